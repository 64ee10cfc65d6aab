use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use vxi11_client::{Connector, Endpoint, Error, ErrorCode, Transport};
use vxi11_protocol::{Procedure, Program};

use crate::Instrument;

/// Connects controllers directly to an [`Instrument`] and counts every transport invocation.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    instrument: Instrument,
    invocations: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(instrument: Instrument) -> MemoryConnector {
        MemoryConnector {
            instrument,
            invocations: Arc::default(),
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Number of `open` and `call` invocations on all sessions
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn session(&self) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            instrument: self.instrument.clone(),
            invocations: self.invocations.clone(),
            program: None,
        })
    }
}

struct MemoryTransport {
    instrument: Instrument,
    invocations: Arc<AtomicUsize>,
    program: Option<Program>,
}

impl Transport for MemoryTransport {
    fn open(&mut self, endpoint: &Endpoint) -> Result<(), Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.program.is_some() {
            return Err(Error::new(
                ErrorCode::ChannelAlreadyEstablished,
                "session is already open",
            ));
        }
        self.program = Some(endpoint.program);
        Ok(())
    }

    fn call(&mut self, procedure: u32, request: &[u8], _: Duration) -> Result<Vec<u8>, Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let program = self
            .program
            .ok_or_else(|| Error::new(ErrorCode::ChannelNotEstablished, "session is closed"))?;
        let procedure = Procedure::from_number(program, procedure).ok_or_else(|| {
            Error::new(
                ErrorCode::RpcError,
                format!("procedure {} unavailable in {}", procedure, program),
            )
        })?;
        self.instrument
            .handle(procedure, request)
            .map_err(|err| Error::new(ErrorCode::RpcError, err.to_string()))
    }

    fn close(&mut self) {
        self.program = None;
    }

    fn is_open(&self) -> bool {
        self.program.is_some()
    }
}
