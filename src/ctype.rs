use lzxd::Lzxd;

use crate::error::{CabError, Result};
use crate::mszip::MsZipDecompressor;
use crate::quantum::QuantumDecompressor;

const CTYPE_NONE: u16 = 0;
const CTYPE_MSZIP: u16 = 1;
const CTYPE_QUANTUM: u16 = 2;
const CTYPE_LZX: u16 = 3;

const QUANTUM_LEVEL_MIN: u16 = 1;
const QUANTUM_LEVEL_MAX: u16 = 7;
const QUANTUM_MEMORY_MIN: u16 = 10;
const QUANTUM_MEMORY_MAX: u16 = 21;

/// A scheme for compressing data within the cabinet.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression.
    None,
    /// MSZIP compression.  MSZIP is described further in
    /// [MS-MCI](https://msdn.microsoft.com/en-us/library/cc483131.aspx).
    MsZip,
    /// Quantum compression with the given level and memory (window =
    /// 2^memory bytes).
    Quantum(u16, u16),
    /// LZX compression with the given window size.  The LZX compression
    /// scheme is described further in
    /// [MS-PATCH](https://msdn.microsoft.com/en-us/library/cc483133.aspx).
    Lzx(lzxd::WindowSize),
}

impl CompressionType {
    pub(crate) fn from_bitfield(bits: u16) -> Result<CompressionType> {
        let ctype = bits & 0x000f;
        if ctype == CTYPE_NONE {
            Ok(CompressionType::None)
        } else if ctype == CTYPE_MSZIP {
            Ok(CompressionType::MsZip)
        } else if ctype == CTYPE_QUANTUM {
            let level = (bits & 0x00f0) >> 4;
            if !(QUANTUM_LEVEL_MIN..=QUANTUM_LEVEL_MAX).contains(&level) {
                return Err(CabError::MalformedHeader(format!(
                    "invalid Quantum level: 0x{:02x}",
                    level
                )));
            }
            let memory = (bits & 0x1f00) >> 8;
            if !(QUANTUM_MEMORY_MIN..=QUANTUM_MEMORY_MAX).contains(&memory) {
                return Err(CabError::MalformedHeader(format!(
                    "invalid Quantum memory: 0x{:02x}",
                    memory
                )));
            }
            Ok(CompressionType::Quantum(level, memory))
        } else if ctype == CTYPE_LZX {
            let window = (bits & 0x1f00) >> 8;
            let window = match window {
                15 => lzxd::WindowSize::KB32,
                16 => lzxd::WindowSize::KB64,
                17 => lzxd::WindowSize::KB128,
                18 => lzxd::WindowSize::KB256,
                19 => lzxd::WindowSize::KB512,
                20 => lzxd::WindowSize::MB1,
                21 => lzxd::WindowSize::MB2,
                22 => lzxd::WindowSize::MB4,
                23 => lzxd::WindowSize::MB8,
                24 => lzxd::WindowSize::MB16,
                25 => lzxd::WindowSize::MB32,
                _ => {
                    return Err(CabError::MalformedHeader(format!(
                        "invalid LZX window: 0x{:02x}",
                        window
                    )))
                }
            };
            Ok(CompressionType::Lzx(window))
        } else {
            Err(CabError::UnsupportedCodec(bits))
        }
    }

    pub(crate) fn into_decompressor(self) -> Decompressor {
        match self {
            CompressionType::None => Decompressor::Uncompressed,
            CompressionType::MsZip => {
                Decompressor::MsZip(Box::new(MsZipDecompressor::new()))
            }
            CompressionType::Quantum(_, memory) => Decompressor::Quantum(
                Box::new(QuantumDecompressor::new(memory)),
            ),
            CompressionType::Lzx(window_size) => {
                Decompressor::Lzx(Box::new(Lzxd::new(window_size)))
            }
        }
    }
}

/// Per-folder decoder state.  Codecs are stateful across a folder's data
/// blocks, so one of these is owned by each folder reader and blocks are
/// always fed through it in index order.
pub(crate) enum Decompressor {
    Uncompressed,
    MsZip(Box<MsZipDecompressor>),
    Quantum(Box<QuantumDecompressor>),
    Lzx(Box<Lzxd>),
}

impl Decompressor {
    pub(crate) fn reset(&mut self) {
        match self {
            Decompressor::Uncompressed => {}
            Decompressor::MsZip(decompressor) => decompressor.reset(),
            Decompressor::Quantum(decompressor) => decompressor.reset(),
            Decompressor::Lzx(decompressor) => decompressor.reset(),
        }
    }

    pub(crate) fn decompress(
        &mut self,
        data: Vec<u8>,
        uncompressed_size: usize,
    ) -> Result<Vec<u8>> {
        let data = match self {
            Decompressor::Uncompressed => {
                if data.len() != uncompressed_size {
                    return Err(CabError::SizeMismatch {
                        expected: uncompressed_size,
                        actual: data.len(),
                    });
                }
                data
            }
            Decompressor::MsZip(decompressor) => {
                decompressor.decompress_block(&data, uncompressed_size)?
            }
            Decompressor::Quantum(decompressor) => {
                decompressor.decompress_block(&data, uncompressed_size)?
            }
            Decompressor::Lzx(decompressor) => decompressor
                .decompress_next(&data, uncompressed_size)
                .map_err(|error| {
                    CabError::CorruptBlock(format!(
                        "LZX decompression failed: {}",
                        error
                    ))
                })?
                .to_vec(),
        };
        if data.len() != uncompressed_size {
            return Err(CabError::CorruptBlock(format!(
                "block decompressed to {} bytes, expected {}",
                data.len(),
                uncompressed_size
            )));
        }
        Ok(data)
    }
}
