use std::{
    error::Error,
    fmt::Display,
    io::{self},
    str::Utf8Error,
};

/// Errors that may occur when decoding a message or an RPC record.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    InvalidFormat(String),
    TooManyBytes { max: usize, got: usize },
    TrailingBytes(usize),
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl From<Utf8Error> for ReadError {
    fn from(value: Utf8Error) -> Self {
        ReadError::InvalidFormat(format!("Invalid UTF8: {}", value))
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::TooManyBytes { max, got } => {
                write!(f, "Message too large! Maximum is {}, but got {}", max, got)
            }
            ReadError::TrailingBytes(count) => {
                write!(f, "{} unexpected bytes after the end of the message", count)
            }
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::IoError(error) => Some(error),
            _ => None,
        }
    }
}
