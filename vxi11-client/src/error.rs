use std::{error, fmt::Display, io};

use vxi11_protocol::{DeviceErrorCode, error::ReadError};

/// Outcome of an operation. Closed set: every failure of the client maps to exactly one code.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ErrorCode {
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
    /// The host name could not be resolved
    UnknownHost,
    /// The connection to the host could not be established
    TransportError,
    /// The RPC layer rejected the call or returned a malformed reply
    RpcError,
    Unknown,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::NoError
    }

    /// Whether repeating the same call may succeed without recreating the link.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::IoTimeout | ErrorCode::IoError)
    }

    /// Whether the link is unusable and must be created again.
    pub fn requires_new_link(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidLinkIdentifier | ErrorCode::ChannelNotEstablished
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::SyntaxError => "syntax error",
            ErrorCode::DeviceNotAccessible => "device not accessible",
            ErrorCode::InvalidLinkIdentifier => "invalid link identifier",
            ErrorCode::ParameterError => "parameter error",
            ErrorCode::ChannelNotEstablished => "channel not established",
            ErrorCode::OperationNotSupported => "operation not supported",
            ErrorCode::OutOfResources => "out of resources",
            ErrorCode::DeviceLockedByAnotherLink => "device locked by another link",
            ErrorCode::NoLockHeldByThisLink => "no lock held by this link",
            ErrorCode::IoTimeout => "I/O timeout",
            ErrorCode::IoError => "I/O error",
            ErrorCode::InvalidAddress => "invalid address",
            ErrorCode::Abort => "abort",
            ErrorCode::ChannelAlreadyEstablished => "channel already established",
            ErrorCode::UnknownHost => "unknown host",
            ErrorCode::TransportError => "transport error",
            ErrorCode::RpcError => "RPC error",
            ErrorCode::Unknown => "unknown error",
        }
    }
}

impl From<DeviceErrorCode> for ErrorCode {
    fn from(value: DeviceErrorCode) -> Self {
        match value {
            DeviceErrorCode::NoError => ErrorCode::NoError,
            DeviceErrorCode::SyntaxError => ErrorCode::SyntaxError,
            DeviceErrorCode::DeviceNotAccessible => ErrorCode::DeviceNotAccessible,
            DeviceErrorCode::InvalidLinkIdentifier => ErrorCode::InvalidLinkIdentifier,
            DeviceErrorCode::ParameterError => ErrorCode::ParameterError,
            DeviceErrorCode::ChannelNotEstablished => ErrorCode::ChannelNotEstablished,
            DeviceErrorCode::OperationNotSupported => ErrorCode::OperationNotSupported,
            DeviceErrorCode::OutOfResources => ErrorCode::OutOfResources,
            DeviceErrorCode::DeviceLockedByAnotherLink => ErrorCode::DeviceLockedByAnotherLink,
            DeviceErrorCode::NoLockHeldByThisLink => ErrorCode::NoLockHeldByThisLink,
            DeviceErrorCode::IoTimeout => ErrorCode::IoTimeout,
            DeviceErrorCode::IoError => ErrorCode::IoError,
            DeviceErrorCode::InvalidAddress => ErrorCode::InvalidAddress,
            DeviceErrorCode::Abort => ErrorCode::Abort,
            DeviceErrorCode::ChannelAlreadyEstablished => ErrorCode::ChannelAlreadyEstablished,
            DeviceErrorCode::Other(_) => ErrorCode::Unknown,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A failed operation: the classified code and a diagnostic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Error {
        Error {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// An error reported by the instrument in the reply of `operation`
    pub(crate) fn device(code: DeviceErrorCode, operation: &str) -> Error {
        let message = match code {
            DeviceErrorCode::Other(number) => {
                format!("{} failed with unassigned error {}", operation, number)
            }
            _ => format!("{} failed", operation),
        };
        Error::new(code.into(), message)
    }

    pub(crate) fn not_established(message: impl Into<String>) -> Error {
        Error::new(ErrorCode::ChannelNotEstablished, message)
    }

    /// Classifies an I/O failure on an established connection.
    pub(crate) fn from_io(error: &io::Error) -> Error {
        let code = match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorCode::IoTimeout,
            _ => ErrorCode::IoError,
        };
        Error::new(code, error.to_string())
    }
}

/// Fails with the classified error if the instrument reported one.
pub(crate) fn check(code: DeviceErrorCode, operation: &str) -> Result<(), Error> {
    if code.is_error() {
        Err(Error::device(code, operation))
    } else {
        Ok(())
    }
}

impl From<ReadError> for Error {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IoError(error) => Error::from_io(&error),
            other => Error::new(ErrorCode::RpcError, other.to_string()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl error::Error for Error {}

/// Outcome recorded on a [`CallContext`](crate::CallContext) after each operation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Status {
    code: ErrorCode,
    message: String,
}

impl Status {
    pub fn ok() -> Status {
        Status::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&Error> for Status {
    fn from(value: &Error) -> Self {
        Status {
            code: value.code,
            message: value.message.clone(),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}
