use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use vxi11_protocol::{DeviceError, Procedure, Program};

use crate::{
    error::{Error, check},
    link::LinkInfo,
    transport::{Connector, Endpoint, Transport, invoke},
};

/// Session to the abort program of the instrument, opened on first use.
///
/// Runs next to the core session so that an abort is delivered while a read or write
/// occupies the core session.
pub(crate) struct AbortChannel {
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Box<dyn Transport>>>,
}

impl AbortChannel {
    pub fn new(connector: Arc<dyn Connector>) -> AbortChannel {
        AbortChannel {
            connector,
            session: Mutex::new(None),
        }
    }

    /// Sends `device_abort` for the link currently held in `link`, if any.
    ///
    /// Failing to reach the abort program is returned. An error reported by the instrument
    /// only means there was nothing to abort and is logged.
    pub fn abort(
        &self,
        host: &str,
        link: &Mutex<Option<LinkInfo>>,
        timeout: Duration,
    ) -> Result<(), Error> {
        let mut session = self.session.lock();
        // under the session lock: disconnect clears the link before closing the session
        let Some(info) = *link.lock() else {
            log::debug!("Nothing to abort on {}, link is not established", host);
            return Ok(());
        };
        let transport = match session.as_mut() {
            Some(transport) if transport.is_open() => transport,
            _ => {
                let port = (info.abort_port != 0).then_some(info.abort_port);
                let mut transport = self.connector.session();
                transport.open(&Endpoint::new(host, port, Program::Async))?;
                log::debug!("Opened abort channel to {} for link {}", host, info.lid);
                session.insert(transport)
            }
        };
        let resp: DeviceError = invoke(
            transport.as_mut(),
            Procedure::DeviceAbort,
            &info.lid,
            timeout,
        )?;
        if let Err(err) = check(resp.error, "device_abort") {
            log::debug!("Abort of link {} not accepted: {}", info.lid, err);
        }
        Ok(())
    }

    pub fn close(&self) {
        if let Some(mut transport) = self.session.lock().take() {
            transport.close();
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|transport| transport.is_open())
    }
}
