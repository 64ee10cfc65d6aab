/// Read and write implementations for the protocol messages
use std::io::{self, Cursor, Read, Write};

use crate::{
    error::ReadError,
    protocol::{
        CreateLinkParms, CreateLinkResp, DeviceDocmdParms, DeviceDocmdResp, DeviceError,
        DeviceErrorCode, DeviceFlags, DeviceGenericParms, DeviceLockParms, DeviceReadParms,
        DeviceReadResp, DeviceReadStbResp, DeviceWriteParms, DeviceWriteResp, LinkId, ReadReason,
    },
    xdr::{self, MAX_OPAQUE_LEN},
};

/// Longest device name accepted when decoding `create_link`
const MAX_DEVICE_NAME_LEN: usize = 256;

/// A message that can be serialized as XDR.
pub trait Encode {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()>;

    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}

/// A message that can be deserialized from XDR.
pub trait Decode: Sized {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError>;

    /// Decodes a complete message, rejecting trailing data.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ReadError> {
        let mut cursor = Cursor::new(bytes);
        let message = Self::from_reader(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(ReadError::TrailingBytes(bytes.len() - consumed));
        }
        Ok(message)
    }
}

fn read_error_code(reader: &mut impl Read) -> Result<DeviceErrorCode, ReadError> {
    Ok(DeviceErrorCode::from_u32(xdr::read_u32(reader)?))
}

fn read_link(reader: &mut impl Read) -> Result<LinkId, ReadError> {
    Ok(LinkId(xdr::read_u32(reader)?))
}

fn read_flags(reader: &mut impl Read) -> Result<DeviceFlags, ReadError> {
    Ok(DeviceFlags::from_bits_retain(xdr::read_u32(reader)?))
}

fn read_u8(reader: &mut impl Read) -> Result<u8, ReadError> {
    let value = xdr::read_u32(reader)?;
    u8::try_from(value)
        .map_err(|_| ReadError::InvalidFormat(format!("Value {} does not fit a byte", value)))
}

fn read_u16(reader: &mut impl Read) -> Result<u16, ReadError> {
    let value = xdr::read_u32(reader)?;
    u16::try_from(value)
        .map_err(|_| ReadError::InvalidFormat(format!("Value {} does not fit a short", value)))
}

impl Encode for LinkId {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.0)
    }
}

impl Decode for LinkId {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        read_link(reader)
    }
}

impl Encode for DeviceError {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.error.as_u32())
    }
}

impl Decode for DeviceError {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceError {
            error: read_error_code(reader)?,
        })
    }
}

impl Encode for CreateLinkParms {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_i32(writer, self.client_id)?;
        xdr::write_bool(writer, self.lock_device)?;
        xdr::write_u32(writer, self.lock_timeout)?;
        xdr::write_string(writer, &self.device)
    }
}

impl Decode for CreateLinkParms {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(CreateLinkParms {
            client_id: xdr::read_i32(reader)?,
            lock_device: xdr::read_bool(reader)?,
            lock_timeout: xdr::read_u32(reader)?,
            device: xdr::read_string(reader, MAX_DEVICE_NAME_LEN)?,
        })
    }
}

impl Encode for CreateLinkResp {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.error.as_u32())?;
        xdr::write_u32(writer, self.lid.0)?;
        xdr::write_u32(writer, self.abort_port as u32)?;
        xdr::write_u32(writer, self.max_recv_size)
    }
}

impl Decode for CreateLinkResp {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(CreateLinkResp {
            error: read_error_code(reader)?,
            lid: read_link(reader)?,
            abort_port: read_u16(reader)?,
            max_recv_size: xdr::read_u32(reader)?,
        })
    }
}

impl Encode for DeviceWriteParms {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.lid.0)?;
        xdr::write_u32(writer, self.io_timeout)?;
        xdr::write_u32(writer, self.lock_timeout)?;
        xdr::write_u32(writer, self.flags.bits())?;
        xdr::write_opaque(writer, &self.data)
    }
}

impl Decode for DeviceWriteParms {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceWriteParms {
            lid: read_link(reader)?,
            io_timeout: xdr::read_u32(reader)?,
            lock_timeout: xdr::read_u32(reader)?,
            flags: read_flags(reader)?,
            data: xdr::read_opaque(reader, MAX_OPAQUE_LEN)?,
        })
    }
}

impl Encode for DeviceWriteResp {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.error.as_u32())?;
        xdr::write_u32(writer, self.size)
    }
}

impl Decode for DeviceWriteResp {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceWriteResp {
            error: read_error_code(reader)?,
            size: xdr::read_u32(reader)?,
        })
    }
}

impl Encode for DeviceReadParms {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.lid.0)?;
        xdr::write_u32(writer, self.request_size)?;
        xdr::write_u32(writer, self.io_timeout)?;
        xdr::write_u32(writer, self.lock_timeout)?;
        xdr::write_u32(writer, self.flags.bits())?;
        xdr::write_u32(writer, self.term_char as u32)
    }
}

impl Decode for DeviceReadParms {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceReadParms {
            lid: read_link(reader)?,
            request_size: xdr::read_u32(reader)?,
            io_timeout: xdr::read_u32(reader)?,
            lock_timeout: xdr::read_u32(reader)?,
            flags: read_flags(reader)?,
            term_char: read_u8(reader)?,
        })
    }
}

impl Encode for DeviceReadResp {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.error.as_u32())?;
        xdr::write_u32(writer, self.reason.bits())?;
        xdr::write_opaque(writer, &self.data)
    }
}

impl Decode for DeviceReadResp {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceReadResp {
            error: read_error_code(reader)?,
            reason: ReadReason::from_bits_retain(xdr::read_u32(reader)?),
            data: xdr::read_opaque(reader, MAX_OPAQUE_LEN)?,
        })
    }
}

impl Encode for DeviceReadStbResp {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.error.as_u32())?;
        xdr::write_u32(writer, self.stb as u32)
    }
}

impl Decode for DeviceReadStbResp {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceReadStbResp {
            error: read_error_code(reader)?,
            stb: read_u8(reader)?,
        })
    }
}

impl Encode for DeviceGenericParms {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.lid.0)?;
        xdr::write_u32(writer, self.flags.bits())?;
        xdr::write_u32(writer, self.lock_timeout)?;
        xdr::write_u32(writer, self.io_timeout)
    }
}

impl Decode for DeviceGenericParms {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceGenericParms {
            lid: read_link(reader)?,
            flags: read_flags(reader)?,
            lock_timeout: xdr::read_u32(reader)?,
            io_timeout: xdr::read_u32(reader)?,
        })
    }
}

impl Encode for DeviceLockParms {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.lid.0)?;
        xdr::write_u32(writer, self.flags.bits())?;
        xdr::write_u32(writer, self.lock_timeout)
    }
}

impl Decode for DeviceLockParms {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceLockParms {
            lid: read_link(reader)?,
            flags: read_flags(reader)?,
            lock_timeout: xdr::read_u32(reader)?,
        })
    }
}

impl Encode for DeviceDocmdParms {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.lid.0)?;
        xdr::write_u32(writer, self.flags.bits())?;
        xdr::write_u32(writer, self.io_timeout)?;
        xdr::write_u32(writer, self.lock_timeout)?;
        xdr::write_i32(writer, self.cmd)?;
        xdr::write_bool(writer, self.network_order)?;
        xdr::write_i32(writer, self.datasize)?;
        xdr::write_opaque(writer, &self.data_in)
    }
}

impl Decode for DeviceDocmdParms {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceDocmdParms {
            lid: read_link(reader)?,
            flags: read_flags(reader)?,
            io_timeout: xdr::read_u32(reader)?,
            lock_timeout: xdr::read_u32(reader)?,
            cmd: xdr::read_i32(reader)?,
            network_order: xdr::read_bool(reader)?,
            datasize: xdr::read_i32(reader)?,
            data_in: xdr::read_opaque(reader, MAX_OPAQUE_LEN)?,
        })
    }
}

impl Encode for DeviceDocmdResp {
    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        xdr::write_u32(writer, self.error.as_u32())?;
        xdr::write_opaque(writer, &self.data_out)
    }
}

impl Decode for DeviceDocmdResp {
    fn from_reader(reader: &mut impl Read) -> Result<Self, ReadError> {
        Ok(DeviceDocmdResp {
            error: read_error_code(reader)?,
            data_out: xdr::read_opaque(reader, MAX_OPAQUE_LEN)?,
        })
    }
}
