//! Decoder for the Quantum compression scheme (LZ77 over an adaptive
//! arithmetic coder), as embedded in cabinet folders.  The format is
//! described in QUANTUM.DOC and in Matthew Russotto's notes on the coder;
//! the model layout here follows the libmspack implementation.

use crate::error::{CabError, Result};

/// Position slot base offsets for match decoding.
const POSITION_BASE: [u32; 42] = [
    0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512,
    768, 1024, 1536, 2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576, 32768,
    49152, 65536, 98304, 131072, 196608, 262144, 393216, 524288, 786432,
    1048576, 1572864,
];

/// Extra bits read after each position slot.
const EXTRA_BITS: [u8; 42] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10,
    11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18, 19, 19,
];

/// Length slot bases for selector-6 (variable-length) matches.
const LENGTH_BASE: [u16; 27] = [
    0, 1, 2, 3, 4, 5, 6, 8, 10, 12, 14, 18, 22, 26, 30, 38, 46, 54, 62, 78,
    94, 110, 126, 158, 190, 222, 254,
];

/// Extra bits read after each length slot.
const LENGTH_EXTRA: [u8; 27] = [
    0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5,
    5, 5, 0,
];

const NUM_SELECTORS: usize = 7;
const NUM_POSITION_SLOTS: usize = 42;
const NUM_LENGTH_SLOTS: usize = 27;
const MODEL_RESCALE_THRESHOLD: u16 = 3800;

#[derive(Clone)]
struct ModelSym {
    sym: u16,
    cumfreq: u16,
}

/// An adaptive frequency model.  `syms[0].cumfreq` is the total frequency;
/// `syms[entries].cumfreq` is always zero, so entry `i` covers the bracket
/// `[syms[i + 1].cumfreq, syms[i].cumfreq)`.
struct Model {
    shift_left: i32,
    entries: usize,
    syms: Vec<ModelSym>,
}

impl Model {
    fn new(start: u16, len: usize) -> Model {
        let syms = (0..=len)
            .map(|i| ModelSym {
                sym: start + i as u16,
                cumfreq: (len - i) as u16,
            })
            .collect();
        Model { shift_left: 4, entries: len, syms }
    }

    /// Halves all frequencies once the total passes the rescale threshold.
    /// Every 50th rescale additionally re-sorts symbols by frequency, which
    /// keeps the common symbols near the front of the linear search.
    fn rescale(&mut self) {
        self.shift_left -= 1;
        if self.shift_left > 0 {
            for i in (0..self.entries).rev() {
                self.syms[i].cumfreq >>= 1;
                if self.syms[i].cumfreq <= self.syms[i + 1].cumfreq {
                    self.syms[i].cumfreq = self.syms[i + 1].cumfreq + 1;
                }
            }
        } else {
            self.shift_left = 50;
            // Cumulative frequencies become individual ones for the sort.
            for i in 0..self.entries {
                self.syms[i].cumfreq -= self.syms[i + 1].cumfreq;
                self.syms[i].cumfreq += 1;
                self.syms[i].cumfreq >>= 1;
            }
            // Selection sort, descending; matches the original coder, and
            // stability matters for bit-exact output.
            for i in 0..self.entries.saturating_sub(1) {
                for j in (i + 1)..self.entries {
                    if self.syms[i].cumfreq < self.syms[j].cumfreq {
                        self.syms.swap(i, j);
                    }
                }
            }
            for i in (0..self.entries).rev() {
                self.syms[i].cumfreq += self.syms[i + 1].cumfreq;
            }
        }
    }
}

/// MSB-first bit cursor over one block's payload.  Bits arrive in 16-bit
/// big-endian words; reads past the end pad with zero bits, as the coder's
/// final renormalizations may consume a few bits beyond the stream.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buffer: u32,
    bits_left: i32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader { data, pos: 0, bit_buffer: 0, bits_left: 0 }
    }

    fn fill(&mut self) {
        let mut word = 0u32;
        for _ in 0..2 {
            let byte = self.data.get(self.pos).copied().unwrap_or(0);
            self.pos += 1;
            word = (word << 8) | byte as u32;
        }
        // Valid bits occupy the top of the buffer; new bits slot in below.
        self.bit_buffer |= word << (16 - self.bits_left);
        self.bits_left += 16;
    }

    fn ensure_bits(&mut self, n: i32) {
        while self.bits_left < n {
            self.fill();
        }
    }

    fn peek_bits(&self, n: i32) -> u32 {
        self.bit_buffer >> (32 - n)
    }

    fn remove_bits(&mut self, n: i32) {
        self.bit_buffer <<= n;
        self.bits_left -= n;
    }

    fn read_bits(&mut self, n: i32) -> u32 {
        if n == 0 {
            return 0;
        }
        self.ensure_bits(n);
        let value = self.peek_bits(n);
        self.remove_bits(n);
        value
    }

    /// Reads up to 32 bits, 16 at a time, for position-slot extra bits.
    fn read_many_bits(&mut self, mut n: i32) -> u32 {
        let mut value = 0u32;
        while n > 0 {
            if self.bits_left <= 16 {
                self.fill();
            }
            let run = n.min(self.bits_left);
            value = (value << run) | self.peek_bits(run);
            self.remove_bits(run);
            n -= run;
        }
        value
    }
}

/// The arithmetic coder interval state, re-initialized per data block.
struct ArithDecoder {
    high: u16,
    low: u16,
    code: u16,
}

impl ArithDecoder {
    fn new(bits: &mut BitReader) -> ArithDecoder {
        ArithDecoder { high: 0xffff, low: 0, code: bits.read_bits(16) as u16 }
    }

    /// Decodes one symbol from `model`, narrows the interval, bumps the
    /// decoded symbol's frequency, and renormalizes.
    fn decode_symbol(
        &mut self,
        model: &mut Model,
        bits: &mut BitReader,
    ) -> Result<u16> {
        let high = self.high as u32;
        let low = self.low as u32;
        let code = self.code as u32;

        let range = (high.wrapping_sub(low) & 0xffff) + 1;
        let total_freq = model.syms[0].cumfreq as u32;
        if total_freq == 0 {
            return Err(CabError::CorruptBlock(
                "Quantum model has zero total frequency".to_string(),
            ));
        }
        let symf = code
            .wrapping_sub(low)
            .wrapping_add(1)
            .wrapping_mul(total_freq)
            .wrapping_sub(1)
            / range
            & 0xffff;

        // Find the bracket containing symf.
        let mut i = 1;
        while i < model.entries {
            if (model.syms[i].cumfreq as u32) <= symf {
                break;
            }
            i += 1;
        }
        let sym = model.syms[i - 1].sym;

        let range = high.wrapping_sub(low) + 1;
        self.high = (low + model.syms[i - 1].cumfreq as u32 * range
            / total_freq
            - 1) as u16;
        self.low =
            (low + model.syms[i].cumfreq as u32 * range / total_freq) as u16;

        for j in (0..i).rev() {
            model.syms[j].cumfreq += 8;
        }
        if model.syms[0].cumfreq > MODEL_RESCALE_THRESHOLD {
            model.rescale();
        }

        loop {
            if (self.low & 0x8000) != (self.high & 0x8000) {
                if (self.low & 0x4000) != 0 && (self.high & 0x4000) == 0 {
                    // Underflow: pinch out the middle bit.
                    self.code ^= 0x4000;
                    self.low &= 0x3fff;
                    self.high |= 0x4000;
                } else {
                    break;
                }
            }
            self.low <<= 1;
            self.high = (self.high << 1) | 1;
            self.code = (self.code << 1) | bits.read_bits(1) as u16;
        }

        Ok(sym)
    }
}

/// A decompressor for Quantum-compressed cabinet folders.  The window and
/// the adaptive models persist across the folder's data blocks; the coder
/// interval is re-seeded from the first sixteen bits of each block.
pub struct QuantumDecompressor {
    window: Vec<u8>,
    window_posn: usize,
    selector_model: Model,
    literal_models: [Model; 4],
    match3_model: Model,
    match4_model: Model,
    match_pos_model: Model,
    match_len_model: Model,
}

impl QuantumDecompressor {
    /// `window_bits` is the folder's memory parameter (10..=21); the sliding
    /// window holds `1 << window_bits` bytes.
    pub fn new(window_bits: u16) -> QuantumDecompressor {
        debug_assert!((10..=21).contains(&window_bits));
        let position_slots = (window_bits as usize * 2)
            .min(NUM_POSITION_SLOTS);
        QuantumDecompressor {
            window: vec![0u8; 1 << window_bits],
            window_posn: 0,
            selector_model: Model::new(0, NUM_SELECTORS),
            literal_models: [
                Model::new(0, 64),
                Model::new(64, 64),
                Model::new(128, 64),
                Model::new(192, 64),
            ],
            match3_model: Model::new(0, position_slots.min(24)),
            match4_model: Model::new(0, position_slots.min(36)),
            match_pos_model: Model::new(0, position_slots),
            match_len_model: Model::new(0, NUM_LENGTH_SLOTS),
        }
    }

    pub fn reset(&mut self) {
        let window_bits = self.window.len().trailing_zeros() as u16;
        *self = QuantumDecompressor::new(window_bits);
    }

    pub fn decompress_block(
        &mut self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> Result<Vec<u8>> {
        let mut bits = BitReader::new(data);
        let mut coder = ArithDecoder::new(&mut bits);
        let mut out = Vec::<u8>::with_capacity(uncompressed_size);
        let window_size = self.window.len();

        while out.len() < uncompressed_size {
            let selector =
                coder.decode_symbol(&mut self.selector_model, &mut bits)?;
            if selector < 4 {
                let model = &mut self.literal_models[selector as usize];
                let byte = coder.decode_symbol(model, &mut bits)? as u8;
                self.window[self.window_posn] = byte;
                self.window_posn = (self.window_posn + 1) & (window_size - 1);
                out.push(byte);
                continue;
            }
            let (match_offset, match_length) = match selector {
                4 => {
                    let slot = coder
                        .decode_symbol(&mut self.match3_model, &mut bits)?
                        as usize;
                    let extra =
                        bits.read_many_bits(extra_bits_for(slot)? as i32);
                    ((POSITION_BASE[slot] + extra + 1) as usize, 3)
                }
                5 => {
                    let slot = coder
                        .decode_symbol(&mut self.match4_model, &mut bits)?
                        as usize;
                    let extra =
                        bits.read_many_bits(extra_bits_for(slot)? as i32);
                    ((POSITION_BASE[slot] + extra + 1) as usize, 4)
                }
                6 => {
                    let len_slot = coder
                        .decode_symbol(&mut self.match_len_model, &mut bits)?
                        as usize;
                    if len_slot >= NUM_LENGTH_SLOTS {
                        return Err(CabError::CorruptBlock(format!(
                            "invalid Quantum length slot {}",
                            len_slot
                        )));
                    }
                    let len_extra = bits
                        .read_many_bits(LENGTH_EXTRA[len_slot] as i32)
                        as usize;
                    let length =
                        LENGTH_BASE[len_slot] as usize + len_extra + 5;
                    let slot = coder
                        .decode_symbol(&mut self.match_pos_model, &mut bits)?
                        as usize;
                    let extra =
                        bits.read_many_bits(extra_bits_for(slot)? as i32);
                    ((POSITION_BASE[slot] + extra + 1) as usize, length)
                }
                _ => {
                    return Err(CabError::CorruptBlock(format!(
                        "invalid Quantum selector {}",
                        selector
                    )));
                }
            };
            if match_offset > window_size {
                return Err(CabError::CorruptBlock(format!(
                    "Quantum match offset {} exceeds window size {}",
                    match_offset, window_size
                )));
            }
            let mut src =
                (self.window_posn + window_size - match_offset)
                    & (window_size - 1);
            // Matches never span a block boundary; clamp to what remains.
            let count = match_length.min(uncompressed_size - out.len());
            for _ in 0..count {
                let byte = self.window[src];
                self.window[self.window_posn] = byte;
                out.push(byte);
                src = (src + 1) & (window_size - 1);
                self.window_posn = (self.window_posn + 1) & (window_size - 1);
            }
        }
        Ok(out)
    }
}

fn extra_bits_for(slot: usize) -> Result<u8> {
    if slot >= NUM_POSITION_SLOTS {
        return Err(CabError::CorruptBlock(format!(
            "invalid Quantum position slot {}",
            slot
        )));
    }
    Ok(EXTRA_BITS[slot])
}

#[cfg(test)]
mod tests {
    use super::{BitReader, Model, QuantumDecompressor};

    #[test]
    fn bit_reader_is_msb_first_big_endian_words() {
        let mut bits = BitReader::new(&[0xa5, 0x0f, 0xff, 0x00]);
        assert_eq!(bits.read_bits(4), 0xa);
        assert_eq!(bits.read_bits(4), 0x5);
        assert_eq!(bits.read_bits(8), 0x0f);
        assert_eq!(bits.read_bits(16), 0xff00);
    }

    #[test]
    fn bit_reader_pads_past_end_with_zeros() {
        let mut bits = BitReader::new(&[0xff]);
        assert_eq!(bits.read_bits(16), 0xff00);
        assert_eq!(bits.read_bits(16), 0);
    }

    #[test]
    fn read_many_bits_crosses_word_boundaries() {
        let mut bits = BitReader::new(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(bits.read_many_bits(24), 0x123456);
        assert_eq!(bits.read_bits(8), 0x78);
    }

    #[test]
    fn fresh_model_frequencies_are_descending() {
        let model = Model::new(0, 7);
        assert_eq!(model.entries, 7);
        assert_eq!(model.syms[0].cumfreq, 7);
        assert_eq!(model.syms[7].cumfreq, 0);
        for i in 0..7 {
            assert!(model.syms[i].cumfreq > model.syms[i + 1].cumfreq);
            assert_eq!(model.syms[i].sym, i as u16);
        }
    }

    #[test]
    fn rescale_preserves_bracket_monotonicity() {
        let mut model = Model::new(0, 64);
        for _ in 0..8 {
            for j in (0..5).rev() {
                model.syms[j].cumfreq += 8;
            }
            model.rescale();
            for i in 0..model.entries {
                assert!(model.syms[i].cumfreq > model.syms[i + 1].cumfreq);
            }
        }
    }

    // An all-zero bit stream steers every symbol lookup to the last model
    // entry: selector 6, maximal length slot, maximal position slot, zero
    // extra bits.  The match copies zero bytes out of the fresh window, so
    // the block decodes to all zeros of the requested size.
    #[test]
    fn all_zero_stream_decodes_to_zeros() {
        let mut decompressor = QuantumDecompressor::new(10);
        let out = decompressor.decompress_block(&[0u8; 16], 24).unwrap();
        assert_eq!(out, vec![0u8; 24]);
    }

    #[test]
    fn window_state_survives_across_blocks() {
        let mut decompressor = QuantumDecompressor::new(10);
        let first = decompressor.decompress_block(&[0u8; 16], 8).unwrap();
        assert_eq!(first, vec![0u8; 8]);
        assert_eq!(decompressor.window_posn, 8);
        let second = decompressor.decompress_block(&[0u8; 16], 8).unwrap();
        assert_eq!(second, vec![0u8; 8]);
        assert_eq!(decompressor.window_posn, 16);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut decompressor = QuantumDecompressor::new(12);
        decompressor.decompress_block(&[0u8; 16], 8).unwrap();
        decompressor.reset();
        assert_eq!(decompressor.window_posn, 0);
        assert_eq!(decompressor.window.len(), 1 << 12);
        assert_eq!(decompressor.selector_model.syms[0].cumfreq, 7);
    }
}
