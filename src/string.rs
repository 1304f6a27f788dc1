use std::io::Read;

use byteorder::ReadBytesExt;

use crate::consts;
use crate::error::{CabError, Result};

/// Reads a null-terminated name field.  When the file entry's UTF attribute
/// bit is set the bytes are UTF-8; otherwise the CAB spec leaves the codepage
/// to the producing application, and we decode the Latin-1 superset.
pub fn read_null_terminated_string<R: Read>(
    reader: &mut R,
    is_utf8: bool,
) -> Result<String> {
    let mut bytes = Vec::<u8>::with_capacity(consts::MAX_STRING_SIZE);
    loop {
        let byte = reader.read_u8()?;
        if byte == 0 {
            break;
        } else if bytes.len() == consts::MAX_STRING_SIZE {
            return Err(CabError::MalformedHeader(format!(
                "string longer than maximum of {} bytes",
                consts::MAX_STRING_SIZE
            )));
        }
        bytes.push(byte);
    }
    if is_utf8 {
        String::from_utf8(bytes).map_err(|_| {
            CabError::MalformedHeader("invalid UTF-8 string".to_string())
        })
    } else {
        Ok(bytes.into_iter().map(char::from).collect())
    }
}
