//! Serves an [`Instrument`] over ONC-RPC on TCP, including a portmapper.
use std::{io, io::Cursor, net::SocketAddr};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use vxi11_protocol::{
    Procedure, Program,
    codec::{Decode, Encode},
    error::ReadError,
    framing::RecordCodec,
    rpc::{CallHeader, GetPortResp, Mapping, PMAP_GETPORT, PMAP_PROGRAM, ReplyHeader, ReplyStatus},
};

use crate::Instrument;

#[derive(Copy, Clone, Debug)]
enum Service {
    Device(Program),
    Portmapper { core: u16, abort: u16 },
}

/// Listening addresses of a running responder. The listeners live as long as the runtime.
#[derive(Debug, Clone, Copy)]
pub struct Responder {
    core: SocketAddr,
    abort: SocketAddr,
    portmapper: SocketAddr,
}

impl Responder {
    /// Binds the core, abort and portmapper listeners on localhost and starts serving.
    pub async fn start(instrument: Instrument) -> io::Result<Responder> {
        let core = TcpListener::bind("127.0.0.1:0").await?;
        let abort = TcpListener::bind("127.0.0.1:0").await?;
        let portmapper = TcpListener::bind("127.0.0.1:0").await?;
        let responder = Responder {
            core: core.local_addr()?,
            abort: abort.local_addr()?,
            portmapper: portmapper.local_addr()?,
        };
        instrument.set_abort_port(responder.abort.port());

        let ports = Service::Portmapper {
            core: responder.core.port(),
            abort: responder.abort.port(),
        };
        tokio::spawn(accept(core, instrument.clone(), Service::Device(Program::Core)));
        tokio::spawn(accept(abort, instrument.clone(), Service::Device(Program::Async)));
        tokio::spawn(accept(portmapper, instrument, ports));
        log::info!("Responder listening on {:?}", responder);
        Ok(responder)
    }

    pub fn core_port(&self) -> u16 {
        self.core.port()
    }

    pub fn abort_port(&self) -> u16 {
        self.abort.port()
    }

    pub fn portmapper_port(&self) -> u16 {
        self.portmapper.port()
    }
}

async fn accept(listener: TcpListener, instrument: Instrument, service: Service) {
    loop {
        match listener.accept().await {
            Ok((tcp, peer)) => {
                log::debug!("New {:?} connection from {}", service, peer);
                tokio::spawn(serve(tcp, instrument.clone(), service));
            }
            Err(e) => {
                log::error!("Connection error: {}", e);
                break;
            }
        }
    }
}

async fn serve(tcp: TcpStream, instrument: Instrument, service: Service) {
    let mut framed = Framed::new(tcp, RecordCodec::default());
    while let Some(record) = framed.next().await {
        let reply = match record {
            Ok(record) => answer(&instrument, service, &record).await,
            Err(e) => Err(e),
        };
        let sent = match reply {
            Ok(reply) => framed.send(reply).await,
            Err(e) => {
                log::error!("Dropping {:?} connection: {}", service, e);
                break;
            }
        };
        if let Err(e) = sent {
            log::error!("Could not send reply: {}", e);
            break;
        }
    }
}

async fn answer(
    instrument: &Instrument,
    service: Service,
    record: &[u8],
) -> Result<Vec<u8>, ReadError> {
    let mut reader = Cursor::new(record);
    let call = CallHeader::from_reader(&mut reader)?;
    let args = record[reader.position() as usize..].to_vec();
    let (status, body) = match service {
        Service::Portmapper { core, abort } => {
            if call.program != PMAP_PROGRAM {
                (ReplyStatus::ProgramUnavailable, Vec::new())
            } else if call.procedure != PMAP_GETPORT {
                (ReplyStatus::ProcedureUnavailable, Vec::new())
            } else {
                let mapping = Mapping::from_bytes(&args)?;
                let port = match Program::from_number(mapping.program) {
                    Some(Program::Core) => core,
                    Some(Program::Async) => abort,
                    None => 0,
                };
                log::debug!("GETPORT {:#x} -> {}", mapping.program, port);
                let resp = GetPortResp { port: port.into() };
                (ReplyStatus::Success, resp.to_bytes()?)
            }
        }
        Service::Device(program) if call.program != program.number() => {
            (ReplyStatus::ProgramUnavailable, Vec::new())
        }
        Service::Device(program) if call.version != program.version() => (
            ReplyStatus::ProgramMismatch {
                low: program.version(),
                high: program.version(),
            },
            Vec::new(),
        ),
        Service::Device(program) => match Procedure::from_number(program, call.procedure) {
            None => (ReplyStatus::ProcedureUnavailable, Vec::new()),
            Some(procedure) => {
                let instrument = instrument.clone();
                // the instrument blocks on reads and lock waits
                match tokio::task::spawn_blocking(move || instrument.handle(procedure, &args)).await {
                    Ok(Ok(body)) => (ReplyStatus::Success, body),
                    Ok(Err(e)) => {
                        log::warn!("Garbage arguments for {:?}: {}", procedure, e);
                        (ReplyStatus::GarbageArgs, Vec::new())
                    }
                    Err(e) => {
                        log::error!("Instrument failed on {:?}: {}", procedure, e);
                        (ReplyStatus::SystemError, Vec::new())
                    }
                }
            }
        },
    };
    let mut reply = ReplyHeader {
        xid: call.xid,
        status,
    }
    .to_bytes()?;
    reply.extend_from_slice(&body);
    Ok(reply)
}
