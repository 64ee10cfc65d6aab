//! The RPC transport the client runs on.
//!
//! All network I/O of the client goes through a [`Transport`]. Controllers and device
//! links obtain unopened sessions from a [`Connector`], so the protocol engine never
//! depends on a concrete transport. [`crate::tcp`] provides the TCP implementation.
use std::time::Duration;

use vxi11_protocol::{
    Procedure, Program,
    codec::{Decode, Encode},
};

use crate::error::{Error, ErrorCode};

/// Where a session connects to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub host: String,
    /// Port of the program, `None` to ask the portmapper
    pub port: Option<u16>,
    pub program: Program,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: Option<u16>, program: Program) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
            program,
        }
    }
}

/// One connection to an RPC program on a host, issuing synchronous calls.
///
/// A session is opened once. After a lost connection or [`Transport::close`] every call
/// fails with [`ErrorCode::ChannelNotEstablished`]; sessions never reconnect on their own.
pub trait Transport: Send {
    /// Connects to `endpoint`.
    ///
    /// Fails with [`ErrorCode::UnknownHost`] if the host cannot be resolved,
    /// [`ErrorCode::TransportError`] if it cannot be reached and
    /// [`ErrorCode::ChannelAlreadyEstablished`] if the session is already open.
    fn open(&mut self, endpoint: &Endpoint) -> Result<(), Error>;

    /// Calls `procedure` with XDR encoded arguments and returns the XDR encoded result.
    ///
    /// Fails with [`ErrorCode::IoTimeout`] if no reply arrives within `timeout`,
    /// [`ErrorCode::RpcError`] on a malformed or rejected reply and
    /// [`ErrorCode::IoError`] if the connection is lost.
    fn call(&mut self, procedure: u32, request: &[u8], timeout: Duration)
    -> Result<Vec<u8>, Error>;

    /// Releases the connection. Calling it again has no effect.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Creates the sessions used by controllers and device links.
pub trait Connector: Send + Sync {
    /// A new, unopened session
    fn session(&self) -> Box<dyn Transport>;
}

/// Encodes `args`, calls `procedure` and decodes the result.
pub(crate) fn invoke<R: Decode>(
    transport: &mut dyn Transport,
    procedure: Procedure,
    args: &impl Encode,
    timeout: Duration,
) -> Result<R, Error> {
    let request = args.to_bytes().map_err(|err| {
        Error::new(
            ErrorCode::ParameterError,
            format!("Cannot encode {:?} arguments: {}", procedure, err),
        )
    })?;
    log::debug!(
        "Calling {:?} with {} bytes of arguments",
        procedure,
        request.len()
    );
    let reply = transport.call(procedure.number(), &request, timeout)?;
    R::from_bytes(&reply).map_err(|err| {
        Error::new(
            ErrorCode::RpcError,
            format!("Malformed {:?} reply: {}", procedure, err),
        )
    })
}
