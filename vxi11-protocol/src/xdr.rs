//! XDR (RFC 4506) primitives used by the VXI-11 messages.
//!
//! Every item occupies a multiple of four bytes in network byte order. Variable
//! length opaque data and strings carry a length prefix and are zero padded.
use std::io::{self, Read, Write};

use crate::error::ReadError;

/// Upper bound for any variable length item decoded without a tighter limit.
pub const MAX_OPAQUE_LEN: usize = 16 * 1024 * 1024;

const PADDING: [u8; 3] = [0; 3];

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

pub fn write_u32(writer: &mut impl Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

pub fn write_i32(writer: &mut impl Write, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

pub fn write_bool(writer: &mut impl Write, value: bool) -> io::Result<()> {
    write_u32(writer, value as u32)
}

pub fn write_opaque(writer: &mut impl Write, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "opaque data too long"))?;
    write_u32(writer, len)?;
    writer.write_all(data)?;
    writer.write_all(&PADDING[..padding(data.len())])
}

pub fn write_string(writer: &mut impl Write, value: &str) -> io::Result<()> {
    write_opaque(writer, value.as_bytes())
}

pub fn read_u32(reader: &mut impl Read) -> Result<u32, ReadError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn read_i32(reader: &mut impl Read) -> Result<i32, ReadError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn read_bool(reader: &mut impl Read) -> Result<bool, ReadError> {
    match read_u32(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ReadError::InvalidFormat(format!(
            "Invalid boolean discriminant {}",
            other
        ))),
    }
}

pub fn read_opaque(reader: &mut impl Read, max_len: usize) -> Result<Vec<u8>, ReadError> {
    let len = read_u32(reader)? as usize;
    if len > max_len {
        return Err(ReadError::TooManyBytes {
            max: max_len,
            got: len,
        });
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    let mut pad = [0u8; 3];
    reader.read_exact(&mut pad[..padding(len)])?;
    Ok(data)
}

pub fn read_string(reader: &mut impl Read, max_len: usize) -> Result<String, ReadError> {
    let bytes = read_opaque(reader, max_len)?;
    Ok(str::from_utf8(&bytes)?.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn opaque_is_padded_to_four_bytes() {
        let mut out = Vec::new();
        write_opaque(&mut out, b"*idn?").unwrap();
        assert_eq!(out, b"\x00\x00\x00\x05*idn?\x00\x00\x00".to_vec());
    }

    #[test]
    fn empty_opaque_has_only_length() {
        let mut out = Vec::new();
        write_opaque(&mut out, b"").unwrap();
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn read_padded_string() {
        let mut cursor = Cursor::new(b"\x00\x00\x00\x05inst0\x00\x00\x00".to_vec());
        assert_eq!(read_string(&mut cursor, 64).unwrap(), "inst0");
        assert_eq!(cursor.position(), 12);
    }

    #[test]
    fn opaque_over_limit_is_rejected() {
        let mut cursor = Cursor::new(b"\x00\x00\x01\x00".to_vec());
        match read_opaque(&mut cursor, 16) {
            Err(ReadError::TooManyBytes { max, got }) => {
                assert_eq!(max, 16);
                assert_eq!(got, 256);
            }
            other => panic!("expected TooManyBytes, got {:?}", other),
        }
    }

    #[test]
    fn invalid_bool() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 2]);
        assert!(matches!(
            read_bool(&mut cursor),
            Err(ReadError::InvalidFormat(_))
        ));
    }
}
