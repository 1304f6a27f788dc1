use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts;
use crate::error::{CabError, Result};
use crate::file::{parse_file_entry, FileEntries, FileEntry, FileReader};
use crate::folder::{
    parse_folder_entry, FolderEntries, FolderEntry, FolderReader,
};
use crate::string::read_null_terminated_string;

pub(crate) trait ReadSeek: Read + Seek {}
impl<R: Read + Seek> ReadSeek for R {}

/// A structure for reading a cabinet file.
///
/// All structural tables (header, folder table, file table) are parsed and
/// validated up front by [`Cabinet::new`]; folder data blocks are
/// decompressed lazily, on extraction.
pub struct Cabinet<R: ?Sized> {
    pub(crate) inner: CabinetInner<R>,
}

pub(crate) struct CabinetInner<R: ?Sized> {
    cabinet_set_id: u16,
    cabinet_set_index: u16,
    data_reserve_size: u8,
    reserve_data: Vec<u8>,
    prev_cabinet: Option<(String, String)>,
    next_cabinet: Option<(String, String)>,
    folders: Vec<FolderEntry>,
    files: Vec<FileEntry>,
    stream_length: u64,
    reader: RefCell<R>,
}

impl<R: ?Sized> CabinetInner<R> {
    pub(crate) fn stream_length(&self) -> u64 {
        self.stream_length
    }
}

impl Cabinet<BufReader<File>> {
    /// Opens the cabinet file at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Cabinet<BufReader<File>>> {
        let file = File::open(path).map_err(CabError::Io)?;
        Cabinet::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> Cabinet<R> {
    /// Reads an existing cabinet out of `reader`.
    pub fn new(mut reader: R) -> Result<Cabinet<R>> {
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != consts::FILE_SIGNATURE {
            return Err(CabError::MalformedHeader(
                "not a cabinet file (invalid file signature)".to_string(),
            ));
        }
        let stream_length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(4))?;
        let _reserved1 = reader.read_u32::<LittleEndian>()?;
        let total_size = reader.read_u32::<LittleEndian>()?;
        if total_size > consts::MAX_TOTAL_CAB_SIZE {
            return Err(CabError::MalformedHeader(format!(
                "cabinet total size field is too large \
                 ({} bytes; max is {} bytes)",
                total_size,
                consts::MAX_TOTAL_CAB_SIZE
            )));
        }
        let _reserved2 = reader.read_u32::<LittleEndian>()?;
        let first_file_offset = reader.read_u32::<LittleEndian>()?;
        if first_file_offset as u64 > stream_length {
            return Err(CabError::InvalidTableOffset {
                offset: first_file_offset as u64,
                length: stream_length,
            });
        }
        let _reserved3 = reader.read_u32::<LittleEndian>()?;
        let minor_version = reader.read_u8()?;
        let major_version = reader.read_u8()?;
        if major_version > consts::VERSION_MAJOR
            || major_version == consts::VERSION_MAJOR
                && minor_version > consts::VERSION_MINOR
        {
            return Err(CabError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }
        let num_folders = reader.read_u16::<LittleEndian>()? as usize;
        let num_files = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let cabinet_set_id = reader.read_u16::<LittleEndian>()?;
        let cabinet_set_index = reader.read_u16::<LittleEndian>()?;
        let mut header_reserve_size = 0u16;
        let mut folder_reserve_size = 0u8;
        let mut data_reserve_size = 0u8;
        if (flags & consts::FLAG_RESERVE_PRESENT) != 0 {
            header_reserve_size = reader.read_u16::<LittleEndian>()?;
            folder_reserve_size = reader.read_u8()?;
            data_reserve_size = reader.read_u8()?;
        }
        let mut header_reserve_data = vec![0u8; header_reserve_size as usize];
        if header_reserve_size > 0 {
            reader.read_exact(&mut header_reserve_data)?;
        }
        // Chained cabinets are identified but never followed; the caller can
        // inspect has_prev_cabinet()/has_next_cabinet() and decide.
        let prev_cabinet = if (flags & consts::FLAG_PREV_CABINET) != 0 {
            let cab_name = read_null_terminated_string(&mut reader, false)?;
            let disk_name = read_null_terminated_string(&mut reader, false)?;
            Some((cab_name, disk_name))
        } else {
            None
        };
        let next_cabinet = if (flags & consts::FLAG_NEXT_CABINET) != 0 {
            let cab_name = read_null_terminated_string(&mut reader, false)?;
            let disk_name = read_null_terminated_string(&mut reader, false)?;
            Some((cab_name, disk_name))
        } else {
            None
        };
        let mut folders = Vec::with_capacity(num_folders);
        for _ in 0..num_folders {
            let entry =
                parse_folder_entry(&mut reader, folder_reserve_size as usize)?;
            if entry.first_data_block_offset as u64 > stream_length {
                return Err(CabError::InvalidTableOffset {
                    offset: entry.first_data_block_offset as u64,
                    length: stream_length,
                });
            }
            folders.push(entry);
        }
        reader.seek(SeekFrom::Start(first_file_offset as u64))?;
        let mut files = Vec::with_capacity(num_files as usize);
        for _ in 0..num_files {
            let entry = parse_file_entry(&mut reader)?;
            let folder_index = entry.folder_index as usize;
            if folder_index >= folders.len() {
                return Err(CabError::MalformedHeader(format!(
                    "file entry {:?} has folder index {} out of bounds \
                     (cabinet has {} folders)",
                    entry.name(),
                    folder_index,
                    folders.len()
                )));
            }
            folders[folder_index].files.push(entry.clone());
            files.push(entry);
        }
        Ok(Cabinet {
            inner: CabinetInner {
                cabinet_set_id,
                cabinet_set_index,
                data_reserve_size,
                reserve_data: header_reserve_data,
                prev_cabinet,
                next_cabinet,
                folders,
                files,
                stream_length,
                reader: RefCell::new(reader),
            },
        })
    }

    /// Returns the cabinet set ID for this cabinet (an arbitrary number used
    /// to group together a set of cabinets).
    pub fn cabinet_set_id(&self) -> u16 {
        self.inner.cabinet_set_id
    }

    /// Returns this cabinet's (zero-based) index within its cabinet set.
    pub fn cabinet_set_index(&self) -> u16 {
        self.inner.cabinet_set_index
    }

    /// Returns the application-defined reserve data stored in the cabinet
    /// header.
    pub fn reserve_data(&self) -> &[u8] {
        &self.inner.reserve_data
    }

    /// Returns true if this cabinet continues a previous one in its set.
    pub fn has_prev_cabinet(&self) -> bool {
        self.inner.prev_cabinet.is_some()
    }

    /// Returns the previous cabinet's name and disk name, if any.
    pub fn prev_cabinet(&self) -> Option<(&str, &str)> {
        self.inner.prev_cabinet.as_ref().map(|(c, d)| (&**c, &**d))
    }

    /// Returns true if this cabinet is continued by a following one.
    pub fn has_next_cabinet(&self) -> bool {
        self.inner.next_cabinet.is_some()
    }

    /// Returns the next cabinet's name and disk name, if any.
    pub fn next_cabinet(&self) -> Option<(&str, &str)> {
        self.inner.next_cabinet.as_ref().map(|(c, d)| (&**c, &**d))
    }

    /// Returns an iterator over the folder entries in this cabinet.
    pub fn folder_entries(&self) -> FolderEntries {
        FolderEntries { iter: self.inner.folders.iter() }
    }

    /// Returns an iterator over every file entry in this cabinet, in file
    /// table order.
    pub fn file_entries(&self) -> FileEntries {
        FileEntries { iter: self.inner.files.iter() }
    }

    /// Returns the entry for the file with the given name, if any.
    pub fn get_file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.inner.files.iter().find(|&file| file.name() == name)
    }

    /// Returns the file entry at the given index in the file table, if any.
    pub fn file_entry_at(&self, index: usize) -> Option<&FileEntry> {
        self.inner.files.get(index)
    }

    /// Returns a reader over the decompressed data for the file in the
    /// cabinet with the given name.
    pub fn read_file(&mut self, name: &str) -> Result<FileReader<R>> {
        match self.get_file_entry(name) {
            Some(file_entry) => {
                let folder_index = file_entry.folder_index as usize;
                let start = file_entry.uncompressed_offset as u64;
                let size = file_entry.uncompressed_size() as u64;
                self.read_file_range(folder_index, start, size)
            }
            None => Err(CabError::UnknownFile(name.to_string())),
        }
    }

    /// Returns a reader over the decompressed data for the file at the given
    /// index in the file table.
    pub fn read_file_at(&mut self, index: usize) -> Result<FileReader<R>> {
        match self.file_entry_at(index) {
            Some(file_entry) => {
                let folder_index = file_entry.folder_index as usize;
                let start = file_entry.uncompressed_offset as u64;
                let size = file_entry.uncompressed_size() as u64;
                self.read_file_range(folder_index, start, size)
            }
            None => Err(CabError::UnknownFile(format!("index {}", index))),
        }
    }

    /// Extracts the named file into `sink`, returning the number of bytes
    /// written (always the file's uncompressed size on success).
    pub fn extract<W: Write>(
        &mut self,
        name: &str,
        sink: &mut W,
    ) -> Result<u64> {
        let mut file_reader = self.read_file(name)?;
        io::copy(&mut file_reader, sink).map_err(CabError::from)
    }

    /// Extracts the file at the given file-table index into `sink`.
    pub fn extract_at<W: Write>(
        &mut self,
        index: usize,
        sink: &mut W,
    ) -> Result<u64> {
        let mut file_reader = self.read_file_at(index)?;
        io::copy(&mut file_reader, sink).map_err(CabError::from)
    }

    /// Extracts every file in the cabinet, obtaining a sink for each from
    /// `sink_factory`.
    ///
    /// Files are processed grouped by folder so that each folder's data
    /// blocks are decompressed exactly once, in order.  The first error
    /// aborts the whole operation; sinks already written are left as-is.
    pub fn extract_all<W, F>(&mut self, mut sink_factory: F) -> Result<()>
    where
        W: Write,
        F: FnMut(&FileEntry) -> io::Result<W>,
    {
        let inner: &CabinetInner<dyn ReadSeek> = &self.inner;
        for folder in &inner.folders {
            if folder.files.is_empty() {
                continue;
            }
            let mut folder_reader: FolderReader<R> =
                FolderReader::new(inner, folder, inner.data_reserve_size)?;
            for file_entry in &folder.files {
                let start = file_entry.uncompressed_offset as u64;
                let size = file_entry.uncompressed_size() as u64;
                check_file_bounds(file_entry, folder_reader.total_size())?;
                let mut sink =
                    sink_factory(file_entry).map_err(CabError::Io)?;
                folder_reader.seek(SeekFrom::Start(start))?;
                let mut file_data = (&mut folder_reader).take(size);
                let written = io::copy(&mut file_data, &mut sink)?;
                if written != size {
                    return Err(CabError::TruncatedData);
                }
            }
        }
        Ok(())
    }

    fn read_file_range(
        &mut self,
        folder_index: usize,
        start: u64,
        size: u64,
    ) -> Result<FileReader<R>> {
        let inner: &CabinetInner<dyn ReadSeek> = &self.inner;
        let folder = &inner.folders[folder_index];
        let mut folder_reader =
            FolderReader::new(inner, folder, inner.data_reserve_size)?;
        if start + size > folder_reader.total_size() {
            return Err(CabError::MalformedHeader(format!(
                "file range {}..{} exceeds its folder's {} data bytes",
                start,
                start + size,
                folder_reader.total_size()
            )));
        }
        folder_reader.seek_to_uncompressed_offset(start)?;
        Ok(FileReader {
            reader: folder_reader,
            file_start_in_folder: start,
            offset: 0,
            size,
        })
    }

    /// Returns a reader over the decompressed data in the specified folder.
    pub(crate) fn read_folder(&mut self, index: usize) -> Result<FolderReader<R>> {
        let inner: &CabinetInner<dyn ReadSeek> = &self.inner;
        let folder = &inner.folders[index];
        FolderReader::new(inner, folder, inner.data_reserve_size)
    }
}

fn check_file_bounds(file_entry: &FileEntry, folder_size: u64) -> Result<()> {
    let start = file_entry.uncompressed_offset as u64;
    let end = start + file_entry.uncompressed_size() as u64;
    if end > folder_size {
        return Err(CabError::MalformedHeader(format!(
            "file {:?} range {}..{} exceeds its folder's {} data bytes",
            file_entry.name(),
            start,
            end,
            folder_size
        )));
    }
    Ok(())
}

impl<'a, R: ?Sized + Read> Read for &'a CabinetInner<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.borrow_mut().read(buf)
    }
}

impl<'a, R: ?Sized + Seek> Seek for &'a CabinetInner<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.borrow_mut().seek(pos)
    }
}
