use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{CabError, Result};

const MSZIP_SIGNATURE: u16 = 0x4b43; // "CK" stored little-endian
const MSZIP_SIGNATURE_LEN: usize = 2;
const DEFLATE_MAX_DICT_LEN: usize = 0x8000;

/// A decompressor for MSZIP-compressed cabinet folders.  Each data block is
/// an independent raw DEFLATE stream, but the last 32 KB of decompressed
/// output carries over as the next block's dictionary, so blocks within a
/// folder must be decoded in order.
pub struct MsZipDecompressor {
    decompressor: flate2::Decompress,
    dictionary: Vec<u8>,
}

impl MsZipDecompressor {
    pub fn new() -> MsZipDecompressor {
        MsZipDecompressor {
            decompressor: flate2::Decompress::new(false),
            dictionary: Vec::with_capacity(DEFLATE_MAX_DICT_LEN),
        }
    }

    pub fn reset(&mut self) {
        self.decompressor.reset(true);
        self.dictionary = Vec::with_capacity(DEFLATE_MAX_DICT_LEN);
    }

    pub fn decompress_block(
        &mut self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> Result<Vec<u8>> {
        if data.len() < MSZIP_SIGNATURE_LEN
            || ((data[0] as u16) | ((data[1] as u16) << 8)) != MSZIP_SIGNATURE
        {
            return Err(CabError::CorruptBlock(
                "invalid MSZIP block signature".to_string(),
            ));
        }
        let data = &data[MSZIP_SIGNATURE_LEN..];
        // Prime a fresh DEFLATE stream with the previous block's tail, fed
        // as a synthetic stored block.
        self.decompressor.reset(false);
        if !self.dictionary.is_empty() {
            debug_assert!(self.dictionary.len() <= DEFLATE_MAX_DICT_LEN);
            let length = self.dictionary.len() as u16;
            let mut chunk: Vec<u8> = vec![0];
            chunk.write_u16::<LittleEndian>(length).unwrap();
            chunk.write_u16::<LittleEndian>(!length).unwrap();
            chunk.extend_from_slice(&self.dictionary);
            let mut out = Vec::with_capacity(self.dictionary.len());
            let flush = flate2::FlushDecompress::Sync;
            match self.decompressor.decompress_vec(&chunk, &mut out, flush) {
                Ok(flate2::Status::Ok) => {}
                _ => unreachable!(),
            }
        }
        let mut out = Vec::<u8>::with_capacity(uncompressed_size);
        let flush = flate2::FlushDecompress::Finish;
        if let Err(error) =
            self.decompressor.decompress_vec(data, &mut out, flush)
        {
            return Err(CabError::CorruptBlock(format!(
                "MSZIP decompression failed: {}",
                error
            )));
        }
        if out.len() != uncompressed_size {
            return Err(CabError::CorruptBlock(format!(
                "MSZIP block decompressed to {} bytes, expected {}",
                out.len(),
                uncompressed_size
            )));
        }
        // Keep the last 32 KB as the next block's dictionary.
        if out.len() >= DEFLATE_MAX_DICT_LEN {
            let start = out.len() - DEFLATE_MAX_DICT_LEN;
            self.dictionary = out[start..].to_vec();
        } else {
            let total = self.dictionary.len() + out.len();
            if total > DEFLATE_MAX_DICT_LEN {
                self.dictionary.drain(..(total - DEFLATE_MAX_DICT_LEN));
            }
            self.dictionary.extend_from_slice(&out);
        }
        Ok(out)
    }
}
