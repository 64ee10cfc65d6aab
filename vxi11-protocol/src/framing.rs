//! [`tokio_util::codec`] framing of RPC records over a byte stream.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{error::ReadError, rpc::LAST_FRAGMENT};

/// Splits a byte stream into RPC records and writes records as single fragments.
#[derive(Debug)]
pub struct RecordCodec {
    max_record_len: usize,
    assembled: BytesMut,
}

impl RecordCodec {
    pub fn new(max_record_len: usize) -> RecordCodec {
        RecordCodec {
            max_record_len,
            assembled: BytesMut::new(),
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        RecordCodec::new(crate::xdr::MAX_OPAQUE_LEN + 1024)
    }
}

impl Decoder for RecordCodec {
    type Item = BytesMut;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, ReadError> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }
            let header = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
            let len = (header & !LAST_FRAGMENT) as usize;
            if self.assembled.len() + len > self.max_record_len {
                return Err(ReadError::TooManyBytes {
                    max: self.max_record_len,
                    got: self.assembled.len() + len,
                });
            }
            if src.len() < 4 + len {
                src.reserve(4 + len - src.len());
                return Ok(None);
            }
            src.advance(4);
            let fragment = src.split_to(len);
            self.assembled.extend_from_slice(&fragment);
            if header & LAST_FRAGMENT != 0 {
                return Ok(Some(self.assembled.split()));
            }
        }
    }
}

impl Encoder<Vec<u8>> for RecordCodec {
    type Error = ReadError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), ReadError> {
        let len = u32::try_from(item.len())
            .ok()
            .filter(|len| len & LAST_FRAGMENT == 0)
            .ok_or(ReadError::TooManyBytes {
                max: (LAST_FRAGMENT - 1) as usize,
                got: item.len(),
            })?;
        dst.reserve(4 + item.len());
        dst.put_u32(LAST_FRAGMENT | len);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
