//! A library for reading and extracting files from [Windows
//! cabinet](https://en.wikipedia.org/wiki/Cabinet_(file_format)) (CAB)
//! archives, with no dependency on any OS-provided cabinet service.
//!
//! A cabinet groups its files into *folders*, each of which is one
//! compressed stream cut into checksummed data blocks.  This crate parses
//! the structural tables up front, then decompresses folder data on demand
//! through the codec the folder declares (stored, MSZIP, Quantum, or LZX).
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//!
//! let mut cabinet = cabfile::Cabinet::open("archive.cab")?;
//! for file in cabinet.file_entries() {
//!     println!("{} ({} bytes)", file.name(), file.uncompressed_size());
//! }
//! let mut reader = cabinet.read_file("setup.inf")?;
//! io::copy(&mut reader, &mut io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

mod cabinet;
mod checksum;
mod consts;
mod ctype;
mod datetime;
mod error;
mod file;
mod folder;
mod mszip;
mod quantum;
mod string;

pub use crate::cabinet::Cabinet;
pub use crate::ctype::CompressionType;
pub use crate::error::{CabError, Result};
pub use crate::file::{FileEntries, FileEntry, FileReader};
pub use crate::folder::{FolderEntries, FolderEntry};
