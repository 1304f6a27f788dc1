use std::cell::RefCell;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use byteorder::{LittleEndian, WriteBytesExt};
use cabfile::{CabError, Cabinet};

// ========================================================================= //

/// Builds a single-folder, stored (uncompressed) cabinet image holding the
/// given files, whose contents are consecutive slices of `data`.
fn build_stored_cabinet(files: &[(&str, u32)], data: &[u8]) -> Vec<u8> {
    let file_table_size: usize =
        files.iter().map(|(name, _)| 16 + name.len() + 1).sum();
    let first_file_offset = 36 + 8;
    let data_offset = first_file_offset + file_table_size;
    let total_size = data_offset + 8 + data.len();

    let mut cab = Vec::<u8>::new();
    cab.write_all(b"MSCF").unwrap();
    cab.write_u32::<LittleEndian>(0).unwrap(); // reserved1
    cab.write_u32::<LittleEndian>(total_size as u32).unwrap();
    cab.write_u32::<LittleEndian>(0).unwrap(); // reserved2
    cab.write_u32::<LittleEndian>(first_file_offset as u32).unwrap();
    cab.write_u32::<LittleEndian>(0).unwrap(); // reserved3
    cab.write_u8(3).unwrap(); // minor version
    cab.write_u8(1).unwrap(); // major version
    cab.write_u16::<LittleEndian>(1).unwrap(); // folder count
    cab.write_u16::<LittleEndian>(files.len() as u16).unwrap();
    cab.write_u16::<LittleEndian>(0).unwrap(); // flags
    cab.write_u16::<LittleEndian>(0x1234).unwrap(); // set ID
    cab.write_u16::<LittleEndian>(0).unwrap(); // set index
    // Folder record:
    cab.write_u32::<LittleEndian>(data_offset as u32).unwrap();
    cab.write_u16::<LittleEndian>(1).unwrap(); // data block count
    cab.write_u16::<LittleEndian>(0).unwrap(); // stored
    // File records:
    let mut offset = 0u32;
    for &(name, size) in files {
        cab.write_u32::<LittleEndian>(size).unwrap();
        cab.write_u32::<LittleEndian>(offset).unwrap();
        cab.write_u16::<LittleEndian>(0).unwrap(); // folder index
        cab.write_u16::<LittleEndian>(0x226c).unwrap(); // date
        cab.write_u16::<LittleEndian>(0x59ba).unwrap(); // time
        cab.write_u16::<LittleEndian>(0).unwrap(); // attributes
        cab.write_all(name.as_bytes()).unwrap();
        cab.write_u8(0).unwrap();
        offset += size;
    }
    // Single CFDATA block, checksum not recorded:
    cab.write_u32::<LittleEndian>(0).unwrap();
    cab.write_u16::<LittleEndian>(data.len() as u16).unwrap();
    cab.write_u16::<LittleEndian>(data.len() as u16).unwrap();
    cab.write_all(data).unwrap();
    assert_eq!(cab.len(), total_size);
    cab
}

// ========================================================================= //

#[test]
fn catalog_and_ranges_of_two_stored_files() {
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 20)], data);
    let mut cabinet = Cabinet::new(Cursor::new(cab)).unwrap();

    let entries: Vec<(String, u32)> = cabinet
        .file_entries()
        .map(|file| (file.name().to_string(), file.uncompressed_size()))
        .collect();
    assert_eq!(
        entries,
        vec![("first.txt".to_string(), 10), ("second.txt".to_string(), 20)]
    );

    let mut sink = Vec::new();
    assert_eq!(cabinet.extract("first.txt", &mut sink).unwrap(), 10);
    assert_eq!(sink, b"0123456789");

    let mut sink = Vec::new();
    assert_eq!(cabinet.extract("second.txt", &mut sink).unwrap(), 20);
    assert_eq!(sink, b"ABCDEFGHIJKLMNOPQRST");
}

#[test]
fn extract_by_index() {
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 20)], data);
    let mut cabinet = Cabinet::new(Cursor::new(cab)).unwrap();

    let mut sink = Vec::new();
    assert_eq!(cabinet.extract_at(1, &mut sink).unwrap(), 20);
    assert_eq!(sink, b"ABCDEFGHIJKLMNOPQRST");

    let error = cabinet.extract_at(2, &mut Vec::new()).unwrap_err();
    assert!(matches!(error, CabError::UnknownFile(_)));
}

#[test]
fn extract_is_idempotent() {
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 20)], data);
    let mut cabinet = Cabinet::new(Cursor::new(cab)).unwrap();

    let mut first = Vec::new();
    cabinet.extract("second.txt", &mut first).unwrap();
    let mut second = Vec::new();
    cabinet.extract("second.txt", &mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn extract_unknown_file_fails_and_leaves_cabinet_usable() {
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 20)], data);
    let mut cabinet = Cabinet::new(Cursor::new(cab)).unwrap();

    let error = cabinet.extract("missing.txt", &mut Vec::new()).unwrap_err();
    assert!(matches!(error, CabError::UnknownFile(_)));

    let mut sink = Vec::new();
    cabinet.extract("first.txt", &mut sink).unwrap();
    assert_eq!(sink, b"0123456789");
}

/// A sink that appends to one slot of a shared collection, so the test can
/// observe everything `extract_all` wrote after the sinks are dropped.
struct CollectSink {
    outputs: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
    index: usize,
}

impl Write for CollectSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outputs.borrow_mut()[self.index].1.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn extract_all_visits_every_file_in_order() {
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 20)], data);
    let mut cabinet = Cabinet::new(Cursor::new(cab)).unwrap();

    let outputs = Rc::new(RefCell::new(Vec::<(String, Vec<u8>)>::new()));
    cabinet
        .extract_all(|file| {
            let mut outs = outputs.borrow_mut();
            outs.push((file.name().to_string(), Vec::new()));
            Ok(CollectSink {
                outputs: Rc::clone(&outputs),
                index: outs.len() - 1,
            })
        })
        .unwrap();

    let outputs = Rc::try_unwrap(outputs).unwrap().into_inner();
    assert_eq!(
        outputs,
        vec![
            ("first.txt".to_string(), b"0123456789".to_vec()),
            ("second.txt".to_string(), b"ABCDEFGHIJKLMNOPQRST".to_vec()),
        ]
    );
}

#[test]
fn mszip_folder_extracts_and_seeks() {
    // One MSZIP folder holding hi.txt + bye.txt.
    let binary: &[u8] = b"MSCF\0\0\0\0\x88\0\0\0\0\0\0\0\
        \x2c\0\0\0\0\0\0\0\x03\x01\x01\0\x02\0\0\0\x34\x12\0\0\
        \x5b\0\0\0\x01\0\x01\0\
        \x0e\0\0\0\0\0\0\0\0\0\x6c\x22\xe7\x59\x01\0hi.txt\0\
        \x0f\0\0\0\x0e\0\0\0\0\0\x6c\x22\xe7\x59\x01\0bye.txt\0\
        \0\0\0\0\x25\0\x1d\0CK\xf3H\xcd\xc9\xc9\xd7Q(\xcf/\xcaIQ\xe4\
        \nNMU\xa8\xcc/U\xc8I,I-R\xe4\x02\x00\x93\xfc\t\x91";
    let mut cabinet = Cabinet::new(Cursor::new(binary)).unwrap();

    let mut reader = cabinet.read_file("bye.txt").unwrap();
    reader.seek(SeekFrom::Start(4)).unwrap();
    let mut tail = String::new();
    reader.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "you later!\n");

    // Seeking backward rewinds and re-decompresses.
    reader.seek(SeekFrom::Start(0)).unwrap();
    let mut all = String::new();
    reader.read_to_string(&mut all).unwrap();
    assert_eq!(all, "See you later!\n");
}

#[test]
fn flipped_payload_bit_is_checksum_mismatch() {
    // A cabinet with a recorded block checksum; corrupt one payload byte
    // without updating the checksum.
    let binary: &[u8] = b"MSCF\0\0\0\0\x59\0\0\0\0\0\0\0\
        \x2c\0\0\0\0\0\0\0\x03\x01\x01\0\x01\0\0\0\x34\x12\0\0\
        \x43\0\0\0\x01\0\0\0\
        \x0e\0\0\0\0\0\0\0\0\0\x6c\x22\xba\x59\x01\0hi.txt\0\
        \x4c\x1a\x2e\x7f\x0e\0\x0e\0Hello, world!\n";
    let mut corrupted = binary.to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0x01;

    let mut cabinet = Cabinet::new(Cursor::new(corrupted)).unwrap();
    let error = cabinet.extract("hi.txt", &mut Vec::new()).unwrap_err();
    assert!(matches!(error, CabError::ChecksumMismatch { block: 0, .. }));
}

#[test]
fn truncated_cabinet_never_panics() {
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 20)], data);
    // Cut the image off at every length; construction or extraction must
    // fail with a typed error, never a panic.
    for length in 0..cab.len() {
        match Cabinet::new(Cursor::new(cab[..length].to_vec())) {
            Ok(mut cabinet) => {
                let result = cabinet.extract("first.txt", &mut Vec::new());
                if length < cab.len() {
                    assert!(result.is_err());
                }
            }
            Err(
                CabError::TruncatedData
                | CabError::InvalidTableOffset { .. }
                | CabError::MalformedHeader(_),
            ) => {}
            Err(error) => panic!("unexpected error: {:?}", error),
        }
    }
}

#[test]
fn file_range_beyond_folder_data_is_rejected() {
    // second.txt claims 25 bytes but the folder only holds 30 total with
    // first.txt occupying 10.
    let data = b"0123456789ABCDEFGHIJKLMNOPQRST";
    let cab =
        build_stored_cabinet(&[("first.txt", 10), ("second.txt", 25)], data);
    let mut cabinet = Cabinet::new(Cursor::new(cab)).unwrap();
    let error = cabinet.extract("second.txt", &mut Vec::new()).unwrap_err();
    assert!(matches!(error, CabError::MalformedHeader(_)));
}

// ========================================================================= //
