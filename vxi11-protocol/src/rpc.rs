//! The subset of ONC-RPC version 2 (RFC 5531) that VXI-11 runs on.
//!
//! Only what a VXI-11 client needs is covered: a call header with `AUTH_NONE`
//! credentials, the accepted/denied reply header, TCP record marking and the
//! portmapper `GETPORT` mapping.
use std::io::{self, Read, Write};

use crate::{
    codec::{Decode, Encode},
    error::ReadError,
    xdr,
};

pub const RPC_VERSION: u32 = 2;

/// Set in a record marking header on the last fragment of a record
pub const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Portmapper program number
pub const PMAP_PROGRAM: u32 = 100_000;
/// Portmapper program version
pub const PMAP_VERSION: u32 = 2;
/// Well known portmapper port
pub const PMAP_PORT: u16 = 111;
/// `PMAPPROC_GETPORT`
pub const PMAP_GETPORT: u32 = 3;
/// Protocol number for TCP in portmapper mappings
pub const IPPROTO_TCP: u32 = 6;

const MSG_CALL: u32 = 0;
const MSG_REPLY: u32 = 1;
const MSG_ACCEPTED: u32 = 0;
const MSG_DENIED: u32 = 1;
const AUTH_NONE: u32 = 0;
const MAX_AUTH_LEN: usize = 400;

/// Header of an RPC call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CallHeader {
    pub xid: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

fn write_auth_none(writer: &mut impl Write) -> io::Result<()> {
    xdr::write_u32(writer, AUTH_NONE)?;
    xdr::write_opaque(writer, &[])
}

fn skip_auth(reader: &mut impl Read) -> Result<(), ReadError> {
    let _flavor = xdr::read_u32(reader)?;
    let _body = xdr::read_opaque(reader, MAX_AUTH_LEN)?;
    Ok(())
}

impl Encode for CallHeader {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.xid)?;
        xdr::write_u32(writer, MSG_CALL)?;
        xdr::write_u32(writer, RPC_VERSION)?;
        xdr::write_u32(writer, self.program)?;
        xdr::write_u32(writer, self.version)?;
        xdr::write_u32(writer, self.procedure)?;
        // credentials, then verifier
        write_auth_none(writer)?;
        write_auth_none(writer)
    }
}

impl Decode for CallHeader {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        let xid = xdr::read_u32(reader)?;
        let msg_type = xdr::read_u32(reader)?;
        if msg_type != MSG_CALL {
            return Err(ReadError::InvalidFormat(format!(
                "Expected a call, got message type {}",
                msg_type
            )));
        }
        let rpc_version = xdr::read_u32(reader)?;
        if rpc_version != RPC_VERSION {
            return Err(ReadError::InvalidFormat(format!(
                "Unsupported RPC version {}",
                rpc_version
            )));
        }
        let program = xdr::read_u32(reader)?;
        let version = xdr::read_u32(reader)?;
        let procedure = xdr::read_u32(reader)?;
        skip_auth(reader)?;
        skip_auth(reader)?;
        Ok(CallHeader {
            xid,
            program,
            version,
            procedure,
        })
    }
}

/// Outcome of an RPC call as reported in the reply header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplyStatus {
    /// The procedure ran; its result follows the header
    Success,
    ProgramUnavailable,
    ProgramMismatch { low: u32, high: u32 },
    ProcedureUnavailable,
    GarbageArgs,
    SystemError,
    /// The call was rejected before reaching the program
    Denied,
}

/// Header of an RPC reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReplyHeader {
    pub xid: u32,
    pub status: ReplyStatus,
}

impl ReplyHeader {
    pub fn success(xid: u32) -> ReplyHeader {
        ReplyHeader {
            xid,
            status: ReplyStatus::Success,
        }
    }
}

impl Encode for ReplyHeader {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.xid)?;
        xdr::write_u32(writer, MSG_REPLY)?;
        if self.status == ReplyStatus::Denied {
            xdr::write_u32(writer, MSG_DENIED)?;
            // AUTH_ERROR, AUTH_REJECTEDCRED
            xdr::write_u32(writer, 1)?;
            return xdr::write_u32(writer, 2);
        }
        xdr::write_u32(writer, MSG_ACCEPTED)?;
        write_auth_none(writer)?;
        match self.status {
            ReplyStatus::Success => xdr::write_u32(writer, 0),
            ReplyStatus::ProgramUnavailable => xdr::write_u32(writer, 1),
            ReplyStatus::ProgramMismatch { low, high } => {
                xdr::write_u32(writer, 2)?;
                xdr::write_u32(writer, low)?;
                xdr::write_u32(writer, high)
            }
            ReplyStatus::ProcedureUnavailable => xdr::write_u32(writer, 3),
            ReplyStatus::GarbageArgs => xdr::write_u32(writer, 4),
            ReplyStatus::SystemError | ReplyStatus::Denied => xdr::write_u32(writer, 5),
        }
    }
}

impl Decode for ReplyHeader {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        let xid = xdr::read_u32(reader)?;
        let msg_type = xdr::read_u32(reader)?;
        if msg_type != MSG_REPLY {
            return Err(ReadError::InvalidFormat(format!(
                "Expected a reply, got message type {}",
                msg_type
            )));
        }
        let status = match xdr::read_u32(reader)? {
            MSG_ACCEPTED => {
                skip_auth(reader)?;
                match xdr::read_u32(reader)? {
                    0 => ReplyStatus::Success,
                    1 => ReplyStatus::ProgramUnavailable,
                    2 => ReplyStatus::ProgramMismatch {
                        low: xdr::read_u32(reader)?,
                        high: xdr::read_u32(reader)?,
                    },
                    3 => ReplyStatus::ProcedureUnavailable,
                    4 => ReplyStatus::GarbageArgs,
                    5 => ReplyStatus::SystemError,
                    other => {
                        return Err(ReadError::InvalidFormat(format!(
                            "Invalid accept status {}",
                            other
                        )));
                    }
                }
            }
            MSG_DENIED => {
                match xdr::read_u32(reader)? {
                    // RPC_MISMATCH carries the supported version range
                    0 => {
                        xdr::read_u32(reader)?;
                        xdr::read_u32(reader)?;
                    }
                    _ => {
                        xdr::read_u32(reader)?;
                    }
                }
                ReplyStatus::Denied
            }
            other => {
                return Err(ReadError::InvalidFormat(format!(
                    "Invalid reply status {}",
                    other
                )));
            }
        };
        Ok(ReplyHeader { xid, status })
    }
}

/// Argument of the portmapper `GETPORT` procedure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub program: u32,
    pub version: u32,
    pub protocol: u32,
    pub port: u32,
}

impl Mapping {
    /// Mapping to look up the TCP port of `program`
    pub fn tcp(program: u32, version: u32) -> Mapping {
        Mapping {
            program,
            version,
            protocol: IPPROTO_TCP,
            port: 0,
        }
    }
}

impl Encode for Mapping {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.program)?;
        xdr::write_u32(writer, self.version)?;
        xdr::write_u32(writer, self.protocol)?;
        xdr::write_u32(writer, self.port)
    }
}

impl Decode for Mapping {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(Mapping {
            program: xdr::read_u32(reader)?,
            version: xdr::read_u32(reader)?,
            protocol: xdr::read_u32(reader)?,
            port: xdr::read_u32(reader)?,
        })
    }
}

/// Reply of the portmapper `GETPORT` procedure. A port of 0 means the program is not registered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GetPortResp {
    pub port: u32,
}

impl Encode for GetPortResp {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.port)
    }
}

impl Decode for GetPortResp {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(GetPortResp {
            port: xdr::read_u32(reader)?,
        })
    }
}

/// Writes `payload` as a single record fragment.
pub fn write_record(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| len & LAST_FRAGMENT == 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record too long"))?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(LAST_FRAGMENT | len).to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Reads one record, reassembling all of its fragments.
pub fn read_record(reader: &mut impl Read, max_len: usize) -> Result<Vec<u8>, ReadError> {
    let mut record = Vec::new();
    loop {
        let header = xdr::read_u32(reader)?;
        let len = (header & !LAST_FRAGMENT) as usize;
        if record.len() + len > max_len {
            return Err(ReadError::TooManyBytes {
                max: max_len,
                got: record.len() + len,
            });
        }
        let start = record.len();
        record.resize(start + len, 0);
        reader.read_exact(&mut record[start..])?;
        if header & LAST_FRAGMENT != 0 {
            return Ok(record);
        }
    }
}
