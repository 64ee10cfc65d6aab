//! ONC-RPC over TCP, the transport VXI-11 instruments speak.
use std::{
    io::Cursor,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use vxi11_protocol::{
    Program,
    codec::{Decode, Encode},
    rpc::{self, CallHeader, GetPortResp, Mapping, ReplyHeader, ReplyStatus},
    xdr::MAX_OPAQUE_LEN,
};

use crate::{
    error::{Error, ErrorCode},
    transport::{Connector, Endpoint, Transport},
};

static NEXT_XID: AtomicU32 = AtomicU32::new(1);

fn next_xid() -> u32 {
    NEXT_XID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub connect_timeout: Duration,
    pub portmapper_port: u16,
    pub portmapper_timeout: Duration,
    /// Largest reply record accepted from the instrument
    pub max_record_len: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            portmapper_port: rpc::PMAP_PORT,
            portmapper_timeout: Duration::from_secs(5),
            max_record_len: MAX_OPAQUE_LEN + 1024,
        }
    }
}

/// A connected stream bound to one RPC program.
#[derive(Debug)]
struct RpcStream {
    stream: TcpStream,
    program: u32,
    version: u32,
    max_record_len: usize,
}

impl RpcStream {
    fn connect(
        addrs: &[SocketAddr],
        port: u16,
        program: u32,
        version: u32,
        config: &TcpConfig,
    ) -> Result<RpcStream, Error> {
        let mut last_error = None;
        for addr in addrs {
            let target = SocketAddr::new(addr.ip(), port);
            match TcpStream::connect_timeout(&target, config.connect_timeout) {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        log::debug!("Cannot disable Nagle on {}: {}", target, err);
                    }
                    return Ok(RpcStream {
                        stream,
                        program,
                        version,
                        max_record_len: config.max_record_len,
                    });
                }
                Err(err) => {
                    log::debug!("Connection to {} failed: {}", target, err);
                    last_error = Some(err);
                }
            }
        }
        let message = match last_error {
            Some(err) => format!("Cannot connect to port {}: {}", port, err),
            None => "No address to connect to".to_string(),
        };
        Err(Error::new(ErrorCode::TransportError, message))
    }

    /// Sends one call and reads back one complete reply record.
    /// Any failure leaves the stream in an unknown state.
    fn exchange(
        &mut self,
        xid: u32,
        procedure: u32,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        // a zero timeout means "block forever" to the socket
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| Error::from_io(&err))?;
        self.stream
            .set_write_timeout(Some(timeout))
            .map_err(|err| Error::from_io(&err))?;

        let mut message = Vec::with_capacity(40 + request.len());
        CallHeader {
            xid,
            program: self.program,
            version: self.version,
            procedure,
        }
        .write_to(&mut message)
        .map_err(|err| Error::from_io(&err))?;
        message.extend_from_slice(request);
        log::trace!("Sending call xid={}: {:02x?}", xid, &message[..]);
        rpc::write_record(&mut self.stream, &message).map_err(|err| Error::from_io(&err))?;

        let record = rpc::read_record(&mut self.stream, self.max_record_len)?;
        log::trace!("Received reply: {:02x?}", &record[..]);
        Ok(record)
    }
}

/// Checks the reply header of `record` and returns the procedure result following it.
fn reply_body(record: &[u8], xid: u32, procedure: u32) -> Result<Vec<u8>, Error> {
    let mut cursor = Cursor::new(record);
    let header = ReplyHeader::from_reader(&mut cursor).map_err(|err| {
        Error::new(
            ErrorCode::RpcError,
            format!("Malformed reply header: {}", err),
        )
    })?;
    if header.xid != xid {
        return Err(Error::new(
            ErrorCode::RpcError,
            format!("Reply for xid {} while waiting for {}", header.xid, xid),
        ));
    }
    if header.status != ReplyStatus::Success {
        return Err(Error::new(
            ErrorCode::RpcError,
            format!("Call of procedure {} failed: {:?}", procedure, header.status),
        ));
    }
    Ok(record[cursor.position() as usize..].to_vec())
}

/// Asks the portmapper of the host for the TCP port of `program`.
fn lookup_port(addrs: &[SocketAddr], program: Program, config: &TcpConfig) -> Result<u16, Error> {
    let mut portmapper = RpcStream::connect(
        addrs,
        config.portmapper_port,
        rpc::PMAP_PROGRAM,
        rpc::PMAP_VERSION,
        config,
    )?;
    let args = Mapping::tcp(program.number(), program.version())
        .to_bytes()
        .map_err(|err| Error::from_io(&err))?;
    let xid = next_xid();
    let record = portmapper.exchange(xid, rpc::PMAP_GETPORT, &args, config.portmapper_timeout)?;
    let body = reply_body(&record, xid, rpc::PMAP_GETPORT)?;
    let resp = GetPortResp::from_bytes(&body).map_err(|err| {
        Error::new(
            ErrorCode::RpcError,
            format!("Malformed GETPORT reply: {}", err),
        )
    })?;
    match u16::try_from(resp.port) {
        Ok(0) => Err(Error::new(
            ErrorCode::TransportError,
            format!("{} is not registered with the portmapper", program),
        )),
        Ok(port) => {
            log::debug!("Portmapper reports {} on port {}", program, port);
            Ok(port)
        }
        Err(_) => Err(Error::new(
            ErrorCode::RpcError,
            format!("Portmapper returned invalid port {}", resp.port),
        )),
    }
}

/// [`Transport`] over a TCP connection.
///
/// The port comes from the [`Endpoint`] or, if absent, from the portmapper of the host.
/// A socket timeout, lost connection or framing error closes the session.
#[derive(Debug, Default)]
pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<RpcStream>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> TcpTransport {
        TcpTransport {
            config,
            stream: None,
        }
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, endpoint: &Endpoint) -> Result<(), Error> {
        if self.stream.is_some() {
            return Err(Error::new(
                ErrorCode::ChannelAlreadyEstablished,
                "session is already open",
            ));
        }
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), 0)
            .to_socket_addrs()
            .map_err(|err| {
                Error::new(
                    ErrorCode::UnknownHost,
                    format!("Cannot resolve {}: {}", endpoint.host, err),
                )
            })?
            .collect();
        if addrs.is_empty() {
            return Err(Error::new(
                ErrorCode::UnknownHost,
                format!("{} has no addresses", endpoint.host),
            ));
        }
        let port = match endpoint.port {
            Some(port) => port,
            None => lookup_port(&addrs, endpoint.program, &self.config)?,
        };
        let stream = RpcStream::connect(
            &addrs,
            port,
            endpoint.program.number(),
            endpoint.program.version(),
            &self.config,
        )?;
        log::info!(
            "Connected to {} on {}:{}",
            endpoint.program,
            endpoint.host,
            port
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn call(
        &mut self,
        procedure: u32,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::not_established("session is not open"))?;
        let xid = next_xid();
        let record = match stream.exchange(xid, procedure, request, timeout) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Closing RPC session after failed call: {}", err);
                self.stream = None;
                return Err(err);
            }
        };
        reply_body(&record, xid, procedure)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::debug!("Closing RPC session to program {:#x}", stream.program);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Creates [`TcpTransport`] sessions.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TcpConfig,
}

impl TcpConnector {
    pub fn new(config: TcpConfig) -> TcpConnector {
        TcpConnector { config }
    }
}

impl Connector for TcpConnector {
    fn session(&self) -> Box<dyn Transport> {
        Box::new(TcpTransport::new(self.config.clone()))
    }
}
