use std::fmt::Display;

use bitflags::bitflags;

/// VXI-11 core channel program number
pub const DEVICE_CORE: u32 = 0x0607AF;

/// VXI-11 core channel program version
pub const DEVICE_CORE_VERSION: u32 = 1;

/// VXI-11 abort channel program number
pub const DEVICE_ASYNC: u32 = 0x0607B0;

/// VXI-11 abort channel program version
pub const DEVICE_ASYNC_VERSION: u32 = 1;

/// `device_docmd` command that asserts or releases the GPIB REN line.
pub const DOCMD_REN: i32 = 0x020003;

/// The two RPC programs a VXI-11 client talks to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Program {
    /// The core channel carrying links and all regular I/O
    Core,
    /// The abort channel, used only for `device_abort`
    Async,
}

impl Program {
    pub fn number(self) -> u32 {
        match self {
            Program::Core => DEVICE_CORE,
            Program::Async => DEVICE_ASYNC,
        }
    }

    pub fn version(self) -> u32 {
        match self {
            Program::Core => DEVICE_CORE_VERSION,
            Program::Async => DEVICE_ASYNC_VERSION,
        }
    }

    pub fn from_number(number: u32) -> Option<Program> {
        match number {
            DEVICE_CORE => Some(Program::Core),
            DEVICE_ASYNC => Some(Program::Async),
            _ => None,
        }
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Program::Core => write!(f, "DEVICE_CORE"),
            Program::Async => write!(f, "DEVICE_ASYNC"),
        }
    }
}

/// Remote procedures of the core and abort channels.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Procedure {
    DeviceAbort,
    CreateLink,
    DeviceWrite,
    DeviceRead,
    DeviceReadStb,
    DeviceTrigger,
    DeviceClear,
    DeviceRemote,
    DeviceLocal,
    DeviceLock,
    DeviceUnlock,
    DeviceDocmd,
    DestroyLink,
}

impl Procedure {
    pub fn number(self) -> u32 {
        match self {
            Procedure::DeviceAbort => 1,
            Procedure::CreateLink => 10,
            Procedure::DeviceWrite => 11,
            Procedure::DeviceRead => 12,
            Procedure::DeviceReadStb => 13,
            Procedure::DeviceTrigger => 14,
            Procedure::DeviceClear => 15,
            Procedure::DeviceRemote => 16,
            Procedure::DeviceLocal => 17,
            Procedure::DeviceLock => 18,
            Procedure::DeviceUnlock => 19,
            Procedure::DeviceDocmd => 22,
            Procedure::DestroyLink => 23,
        }
    }

    /// The program this procedure is served by
    pub fn program(self) -> Program {
        match self {
            Procedure::DeviceAbort => Program::Async,
            _ => Program::Core,
        }
    }

    pub fn from_number(program: Program, number: u32) -> Option<Procedure> {
        let procedure = match (program, number) {
            (Program::Async, 1) => Procedure::DeviceAbort,
            (Program::Core, 10) => Procedure::CreateLink,
            (Program::Core, 11) => Procedure::DeviceWrite,
            (Program::Core, 12) => Procedure::DeviceRead,
            (Program::Core, 13) => Procedure::DeviceReadStb,
            (Program::Core, 14) => Procedure::DeviceTrigger,
            (Program::Core, 15) => Procedure::DeviceClear,
            (Program::Core, 16) => Procedure::DeviceRemote,
            (Program::Core, 17) => Procedure::DeviceLocal,
            (Program::Core, 18) => Procedure::DeviceLock,
            (Program::Core, 19) => Procedure::DeviceUnlock,
            (Program::Core, 22) => Procedure::DeviceDocmd,
            (Program::Core, 23) => Procedure::DestroyLink,
            _ => return None,
        };
        Some(procedure)
    }
}

#[test]
fn procedure_numbers_are_scoped_by_program() {
    assert_eq!(
        Procedure::from_number(Program::Async, 1),
        Some(Procedure::DeviceAbort)
    );
    assert_eq!(Procedure::from_number(Program::Core, 1), None);
    assert_eq!(
        Procedure::from_number(Program::Core, Procedure::DeviceRead.number()),
        Some(Procedure::DeviceRead)
    );
}

/// `Device_ErrorCode` as it appears on the wire.
///
/// Numbers not assigned by VXI-11 are kept in [`DeviceErrorCode::Other`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum DeviceErrorCode {
    #[default]
    NoError,
    SyntaxError,
    DeviceNotAccessible,
    InvalidLinkIdentifier,
    ParameterError,
    ChannelNotEstablished,
    OperationNotSupported,
    OutOfResources,
    DeviceLockedByAnotherLink,
    NoLockHeldByThisLink,
    IoTimeout,
    IoError,
    InvalidAddress,
    Abort,
    ChannelAlreadyEstablished,
    Other(u32),
}

impl DeviceErrorCode {
    pub fn from_u32(value: u32) -> DeviceErrorCode {
        match value {
            0 => DeviceErrorCode::NoError,
            1 => DeviceErrorCode::SyntaxError,
            3 => DeviceErrorCode::DeviceNotAccessible,
            4 => DeviceErrorCode::InvalidLinkIdentifier,
            5 => DeviceErrorCode::ParameterError,
            6 => DeviceErrorCode::ChannelNotEstablished,
            8 => DeviceErrorCode::OperationNotSupported,
            9 => DeviceErrorCode::OutOfResources,
            11 => DeviceErrorCode::DeviceLockedByAnotherLink,
            12 => DeviceErrorCode::NoLockHeldByThisLink,
            15 => DeviceErrorCode::IoTimeout,
            17 => DeviceErrorCode::IoError,
            21 => DeviceErrorCode::InvalidAddress,
            23 => DeviceErrorCode::Abort,
            29 => DeviceErrorCode::ChannelAlreadyEstablished,
            other => DeviceErrorCode::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            DeviceErrorCode::NoError => 0,
            DeviceErrorCode::SyntaxError => 1,
            DeviceErrorCode::DeviceNotAccessible => 3,
            DeviceErrorCode::InvalidLinkIdentifier => 4,
            DeviceErrorCode::ParameterError => 5,
            DeviceErrorCode::ChannelNotEstablished => 6,
            DeviceErrorCode::OperationNotSupported => 8,
            DeviceErrorCode::OutOfResources => 9,
            DeviceErrorCode::DeviceLockedByAnotherLink => 11,
            DeviceErrorCode::NoLockHeldByThisLink => 12,
            DeviceErrorCode::IoTimeout => 15,
            DeviceErrorCode::IoError => 17,
            DeviceErrorCode::InvalidAddress => 21,
            DeviceErrorCode::Abort => 23,
            DeviceErrorCode::ChannelAlreadyEstablished => 29,
            DeviceErrorCode::Other(value) => value,
        }
    }

    pub fn is_error(self) -> bool {
        self != DeviceErrorCode::NoError
    }
}

#[test]
fn unassigned_error_numbers_are_preserved() {
    assert_eq!(DeviceErrorCode::from_u32(2), DeviceErrorCode::Other(2));
    assert_eq!(DeviceErrorCode::Other(2).as_u32(), 2);
    assert_eq!(DeviceErrorCode::from_u32(23), DeviceErrorCode::Abort);
}

/// Identifier of a link, assigned by the instrument in `create_link`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LinkId(pub u32);

impl Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// `Device_Flags` of a request.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct DeviceFlags: u32 {
        /// Wait up to `lock_timeout` for a lock held by another link
        const WAITLOCK = 0x01;
        /// The data of this write is the last of the message
        const END = 0x08;
        /// `term_char` of a read request is valid
        const TERMCHRSET = 0x80;
    }
}

bitflags! {
    /// Reasons reported by the instrument for ending a read.
    /// More than one may be set in the same reply.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct ReadReason: u32 {
        /// The requested number of bytes was transferred
        const REQCNT = 0x01;
        /// The termination character was read
        const CHR = 0x02;
        /// The instrument signalled the end of the message
        const END = 0x04;
    }
}

#[test]
fn read_reason_contains() {
    let reason = ReadReason::END | ReadReason::REQCNT;
    assert!(reason.contains(ReadReason::END));
    assert!(reason.contains(ReadReason::REQCNT));
    assert!(!reason.contains(ReadReason::CHR));
    assert!(ReadReason::empty().is_empty());
}

#[test]
fn unknown_flag_bits_are_retained() {
    let flags = DeviceFlags::from_bits_retain(0x0100 | 0x08);
    assert!(flags.contains(DeviceFlags::END));
    assert_eq!(flags.bits(), 0x0108);
    assert_eq!(ReadReason::from_bits_retain(0x10).bits(), 0x10);
}

/// Arguments of `create_link`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateLinkParms {
    /// Chosen by the client, only used by the instrument for reporting
    pub client_id: i32,
    /// Acquire the lock while creating the link
    pub lock_device: bool,
    /// Time to wait for the lock in milliseconds
    pub lock_timeout: u32,
    /// Name of the device, e.g. `inst0` or `gpib0,5`
    pub device: String,
}

/// Reply of `create_link`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateLinkResp {
    pub error: DeviceErrorCode,
    pub lid: LinkId,
    /// TCP port of the abort channel
    pub abort_port: u16,
    /// Largest `data` the instrument accepts in a single `device_write`
    pub max_recv_size: u32,
}

/// Arguments of `device_write`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceWriteParms {
    pub lid: LinkId,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: DeviceFlags,
    pub data: Vec<u8>,
}

/// Reply of `device_write`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceWriteResp {
    pub error: DeviceErrorCode,
    /// Number of bytes the instrument accepted
    pub size: u32,
}

/// Arguments of `device_read`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceReadParms {
    pub lid: LinkId,
    pub request_size: u32,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: DeviceFlags,
    pub term_char: u8,
}

/// Reply of `device_read`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceReadResp {
    pub error: DeviceErrorCode,
    pub reason: ReadReason,
    pub data: Vec<u8>,
}

/// Reply of `device_readstb`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceReadStbResp {
    pub error: DeviceErrorCode,
    pub stb: u8,
}

/// Arguments shared by `device_readstb`, `device_trigger`, `device_clear`,
/// `device_remote` and `device_local`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceGenericParms {
    pub lid: LinkId,
    pub flags: DeviceFlags,
    pub lock_timeout: u32,
    pub io_timeout: u32,
}

/// Arguments of `device_lock`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceLockParms {
    pub lid: LinkId,
    pub flags: DeviceFlags,
    pub lock_timeout: u32,
}

/// Arguments of `device_docmd`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceDocmdParms {
    pub lid: LinkId,
    pub flags: DeviceFlags,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub cmd: i32,
    pub network_order: bool,
    pub datasize: i32,
    pub data_in: Vec<u8>,
}

/// Reply of `device_docmd`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceDocmdResp {
    pub error: DeviceErrorCode,
    pub data_out: Vec<u8>,
}

/// `Device_Error`, the reply of every procedure that returns nothing but an error
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceError {
    pub error: DeviceErrorCode,
}
