use std::io::{self, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::slice;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::cabinet::{CabinetInner, ReadSeek};
use crate::checksum::Checksum;
use crate::ctype::{CompressionType, Decompressor};
use crate::error::{CabError, Result};
use crate::file::{FileEntries, FileEntry};

/// An iterator over the folder entries in a cabinet.
#[derive(Clone)]
pub struct FolderEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FolderEntry>,
}

/// Metadata about one folder in a cabinet.  A folder is the unit of
/// compression; all of its files share one compressed byte stream.
pub struct FolderEntry {
    pub(crate) first_data_block_offset: u32,
    pub(crate) num_data_blocks: u16,
    pub(crate) compression_type: CompressionType,
    pub(crate) reserve_data: Vec<u8>,
    pub(crate) files: Vec<FileEntry>,
}

/// One CFDATA block descriptor: where the compressed payload lives and what
/// it should decompress to.
#[derive(Debug, Clone)]
struct DataBlockEntry {
    checksum: u32,
    compressed_size: u16,
    uncompressed_size: u16,
    reserve_data: Vec<u8>,
    data_offset: u64,
    cumulative_size: u64,
}

/// A reader over the decompressed byte stream of one cabinet folder.
///
/// Blocks are decompressed strictly in index order, since every codec keeps
/// state across blocks.  Seeking backward rewinds to block zero and
/// re-decompresses forward.
pub struct FolderReader<'a, R> {
    reader: &'a CabinetInner<dyn ReadSeek + 'a>,
    decompressor: Decompressor,
    total_size: u64,
    data_blocks: Vec<DataBlockEntry>,
    current_block_index: usize,
    current_block_data: Vec<u8>,
    current_offset_within_block: usize,
    current_offset_within_folder: u64,
    _p: PhantomData<R>,
}

impl<'a> Iterator for FolderEntries<'a> {
    type Item = &'a FolderEntry;

    fn next(&mut self) -> Option<&'a FolderEntry> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FolderEntries<'a> {}

impl FolderEntry {
    /// Returns the scheme used to compress this folder's data.
    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    /// Returns the number of data blocks used to store this folder's data.
    pub fn num_data_blocks(&self) -> u16 {
        self.num_data_blocks
    }

    /// Returns the application-defined reserve data for this folder.
    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    /// Returns an iterator over the file entries in this folder.
    pub fn file_entries(&self) -> FileEntries {
        FileEntries { iter: self.files.iter() }
    }
}

impl<'a, R: Read + Seek> FolderReader<'a, R> {
    pub(crate) fn new(
        reader: &'a CabinetInner<dyn ReadSeek + 'a>,
        entry: &FolderEntry,
        data_reserve_size: u8,
    ) -> Result<FolderReader<'a, R>> {
        let stream_length = reader.stream_length();
        if entry.first_data_block_offset as u64 > stream_length {
            return Err(CabError::InvalidTableOffset {
                offset: entry.first_data_block_offset as u64,
                length: stream_length,
            });
        }
        let num_data_blocks = entry.num_data_blocks as usize;
        let mut data_blocks = Vec::with_capacity(num_data_blocks);
        let mut total_size: u64 = 0;

        let r = &mut &*reader;
        r.seek(SeekFrom::Start(entry.first_data_block_offset as u64))?;
        for _ in 0..num_data_blocks {
            let r = &mut &*reader;
            let block =
                parse_block_entry(r, total_size, data_reserve_size as usize)?;
            if block.data_offset + block.compressed_size as u64 > stream_length
            {
                return Err(CabError::InvalidTableOffset {
                    offset: block.data_offset + block.compressed_size as u64,
                    length: stream_length,
                });
            }
            total_size += block.uncompressed_size as u64;
            data_blocks.push(block);
        }
        let mut folder_reader = FolderReader {
            reader,
            decompressor: entry.compression_type.into_decompressor(),
            total_size,
            data_blocks,
            current_block_index: 0,
            current_block_data: Vec::new(),
            current_offset_within_block: 0,
            current_offset_within_folder: 0,
            _p: PhantomData,
        };
        folder_reader.load_block()?;
        Ok(folder_reader)
    }

    /// Total decompressed length of this folder.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub(crate) fn seek_to_uncompressed_offset(
        &mut self,
        offset: u64,
    ) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn current_block_start(&self) -> u64 {
        if self.current_block_index == 0 {
            0
        } else {
            self.data_blocks[self.current_block_index - 1].cumulative_size
        }
    }

    fn rewind_to_start(&mut self) -> Result<()> {
        self.current_offset_within_block = 0;
        self.current_offset_within_folder = 0;
        if self.current_block_index != 0 {
            self.current_block_index = 0;
            self.decompressor.reset();
            self.load_block()?;
        }
        Ok(())
    }

    fn load_block(&mut self) -> Result<()> {
        if self.current_block_index >= self.data_blocks.len() {
            self.current_block_data = Vec::new();
            return Ok(());
        }
        let block = &self.data_blocks[self.current_block_index];
        let reader = &mut &*self.reader;

        reader.seek(SeekFrom::Start(block.data_offset))?;
        let mut compressed_data = vec![0u8; block.compressed_size as usize];
        reader.read_exact(&mut compressed_data)?;
        // A recorded checksum of zero means "not computed"; otherwise it
        // must verify before we hand the bytes to the codec.
        if block.checksum != 0 {
            let mut checksum = Checksum::new();
            checksum.update(&block.reserve_data);
            checksum.update(&compressed_data);
            let actual_checksum = checksum.value()
                ^ ((block.compressed_size as u32)
                    | ((block.uncompressed_size as u32) << 16));
            if actual_checksum != block.checksum {
                return Err(CabError::ChecksumMismatch {
                    block: self.current_block_index,
                    expected: block.checksum,
                    actual: actual_checksum,
                });
            }
        }
        self.current_block_data = self
            .decompressor
            .decompress(compressed_data, block.uncompressed_size as usize)?;
        Ok(())
    }
}

impl<'a, R: Read + Seek + 'a> Read for FolderReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // A folder may contain zero-length blocks; skip past them rather
        // than reporting a spurious end of stream.
        while self.current_offset_within_block == self.current_block_data.len()
        {
            if self.current_block_index >= self.data_blocks.len() {
                return Ok(0);
            }
            self.current_block_index += 1;
            self.current_offset_within_block = 0;
            self.load_block().map_err(io::Error::from)?;
        }
        let max_bytes = buf.len().min(
            self.current_block_data.len() - self.current_offset_within_block,
        );
        buf[..max_bytes].copy_from_slice(
            &self.current_block_data[self.current_offset_within_block..]
                [..max_bytes],
        );
        self.current_offset_within_block += max_bytes;
        self.current_offset_within_folder += max_bytes as u64;
        Ok(max_bytes)
    }
}

impl<'a, R: Read + Seek> Seek for FolderReader<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => {
                self.current_offset_within_folder as i64 + delta
            }
            SeekFrom::End(delta) => self.total_size as i64 + delta,
        };
        if new_offset < 0 || (new_offset as u64) > self.total_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot seek to {}, data length is {}",
                    new_offset, self.total_size
                ),
            ));
        }
        let new_offset = new_offset as u64;
        if new_offset < self.current_block_start() {
            self.rewind_to_start().map_err(io::Error::from)?;
        }
        if new_offset > 0 {
            while self.data_blocks[self.current_block_index].cumulative_size
                < new_offset
            {
                self.current_block_index += 1;
                self.load_block().map_err(io::Error::from)?;
            }
        }
        debug_assert!(new_offset >= self.current_block_start());
        self.current_offset_within_block =
            (new_offset - self.current_block_start()) as usize;
        self.current_offset_within_folder = new_offset;
        Ok(new_offset)
    }
}

pub(crate) fn parse_folder_entry<R: Read>(
    mut reader: R,
    reserve_size: usize,
) -> Result<FolderEntry> {
    let first_data_offset = reader.read_u32::<LittleEndian>()?;
    let num_data_blocks = reader.read_u16::<LittleEndian>()?;
    let compression_bits = reader.read_u16::<LittleEndian>()?;
    let compression_type = CompressionType::from_bitfield(compression_bits)?;
    let mut folder_reserve_data = vec![0u8; reserve_size];
    if reserve_size > 0 {
        reader.read_exact(&mut folder_reserve_data)?;
    }
    Ok(FolderEntry {
        first_data_block_offset: first_data_offset,
        num_data_blocks,
        compression_type,
        reserve_data: folder_reserve_data,
        files: Vec::new(),
    })
}

fn parse_block_entry<R: ReadSeek>(
    mut reader: R,
    cumulative_size: u64,
    data_reserve_size: usize,
) -> Result<DataBlockEntry> {
    let checksum = reader.read_u32::<LittleEndian>()?;
    let compressed_size = reader.read_u16::<LittleEndian>()?;
    let uncompressed_size = reader.read_u16::<LittleEndian>()?;
    let mut reserve_data = vec![0u8; data_reserve_size];
    reader.read_exact(&mut reserve_data)?;
    let data_offset = reader.stream_position()?;
    reader.seek(SeekFrom::Current(compressed_size as i64))?;
    let cumulative_size = cumulative_size + uncompressed_size as u64;

    Ok(DataBlockEntry {
        checksum,
        compressed_size,
        uncompressed_size,
        reserve_data,
        cumulative_size,
        data_offset,
    })
}
