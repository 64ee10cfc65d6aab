use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use vxi11_protocol::{
    DeviceError, DeviceFlags, DeviceGenericParms, DeviceLockParms, DeviceReadParms,
    DeviceReadResp, DeviceReadStbResp, DeviceWriteParms, DeviceWriteResp, LinkId, Procedure,
    Program,
};

use crate::{
    abort::AbortChannel,
    config::Config,
    context::{CallContext, TerminationReason},
    controller::Shared,
    error::{Error, ErrorCode, check},
    link::{self, DeviceAddress, LinkInfo},
    transport::{Connector, Endpoint, Transport, invoke},
};

/// A link to one instrument, created by [`Controller::create_device`](crate::Controller::create_device).
///
/// Every operation takes a [`CallContext`], records its outcome there and returns it.
/// Operations on one link are serialized; [`DeviceLink::abort`] is the exception and may be
/// called from another thread while a read or write is outstanding.
///
/// Dropping the link disconnects it.
pub struct DeviceLink {
    host: String,
    name: String,
    address: DeviceAddress,
    controller: Weak<Shared>,
    connector: Arc<dyn Connector>,
    config: Config,
    core: Mutex<Option<Box<dyn Transport>>>,
    link: Mutex<Option<LinkInfo>>,
    abort: AbortChannel,
    locked: AtomicBool,
    term_char: Mutex<Option<u8>>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("link", &*self.link.lock())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl DeviceLink {
    pub(crate) fn new(
        host: String,
        name: String,
        address: DeviceAddress,
        controller: Weak<Shared>,
        connector: Arc<dyn Connector>,
        config: Config,
    ) -> DeviceLink {
        DeviceLink {
            host,
            name,
            address,
            controller,
            abort: AbortChannel::new(connector.clone()),
            connector,
            config,
            core: Mutex::new(None),
            link: Mutex::new(None),
            locked: AtomicBool::new(false),
            term_char: Mutex::new(None),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// The device name the link was created with, e.g. `hpib,20,0`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link_id(&self) -> Option<LinkId> {
        self.link.lock().map(|info| info.lid)
    }

    /// Largest write the instrument accepts in one request, 0 for no limit
    pub fn max_recv_size(&self) -> Option<u32> {
        self.link.lock().map(|info| info.max_recv_size)
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Whether this link holds the lock of the device
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Remote enable state last set on the owning controller
    pub fn remote_enable(&self) -> bool {
        self.controller
            .upgrade()
            .is_some_and(|shared| shared.remote_enable())
    }

    /// Creates the link again after [`DeviceLink::disconnect`] or after its session was lost,
    /// e.g. on [`ErrorCode::IoTimeout`]. A no-op if it is established.
    pub fn connect(&self, ctx: &mut CallContext) -> Result<(), Error> {
        ctx.begin();
        let result = self.ensure_controller().and_then(|()| self.establish(ctx));
        ctx.finish(result)
    }

    pub(crate) fn establish(&self, ctx: &CallContext) -> Result<(), Error> {
        let mut core = self.core.lock();
        let open = core.as_ref().is_some_and(|transport| transport.is_open());
        if open && self.link.lock().is_some() {
            return Ok(());
        }
        if core.take().is_some() {
            self.forget_link();
        }
        let mut transport = self.connector.session();
        transport.open(&Endpoint::new(
            self.host.as_str(),
            self.config.port,
            Program::Core,
        ))?;
        let info = match link::create_link(
            transport.as_mut(),
            ctx,
            &self.name,
            self.config.client_id,
            self.config.rpc_grace,
        ) {
            Ok(info) => info,
            Err(err) => {
                transport.close();
                return Err(err);
            }
        };
        *core = Some(transport);
        *self.link.lock() = Some(info);
        log::info!("Linked to {} on {} (link {})", self.name, self.host, info.lid);
        Ok(())
    }

    /// Destroys the link and closes both sessions. Calling it again has no effect.
    pub fn disconnect(&self) {
        let mut core = self.core.lock();
        let info = self.link.lock().take();
        self.locked.store(false, Ordering::Release);
        self.abort.close();
        let Some(mut transport) = core.take() else {
            return;
        };
        if let Some(info) = info {
            if let Err(err) =
                link::destroy_link(transport.as_mut(), info.lid, self.config.teardown_timeout)
            {
                log::warn!("Could not destroy link {}: {}", info.lid, err);
            }
        }
        transport.close();
        log::info!("Disconnected from {} on {}", self.name, self.host);
    }

    /// Writes `data` as one message and returns the number of bytes written.
    ///
    /// Data longer than the instrument's `max_recv_size` is split into several requests;
    /// only the last one carries END. Empty data sends a single empty request with END.
    /// The I/O timeout applies to each request. On failure
    /// [`CallContext::bytes_transferred`] holds the number of bytes the instrument accepted.
    pub fn write(&self, ctx: &mut CallContext, data: &[u8]) -> Result<usize, Error> {
        self.run(ctx, |transport, info, ctx| {
            write_chunks(transport, info, ctx, data, &self.config)
        })
    }

    /// Reads into `buf` and returns the number of bytes read.
    ///
    /// Without [`CallContext::set_wait_for_end`] this returns after the first reply, which
    /// may hold only part of the response. Check [`CallContext::termination_reason`] and
    /// read again until it is [`TerminationReason::End`].
    pub fn read(&self, ctx: &mut CallContext, buf: &mut [u8]) -> Result<usize, Error> {
        let term_char = ctx.term_char().or(*self.term_char.lock());
        self.run(ctx, |transport, info, ctx| {
            read_chunks(transport, info, ctx, buf, term_char, &self.config)
        })
    }

    /// Acquires the exclusive lock of the device.
    ///
    /// With a non-zero lock timeout on `ctx` the instrument waits that long for another
    /// link to release it, otherwise this fails at once with
    /// [`ErrorCode::DeviceLockedByAnotherLink`].
    pub fn lock(&self, ctx: &mut CallContext) -> Result<(), Error> {
        self.run(ctx, |transport, info, ctx| {
            let parms = DeviceLockParms {
                lid: info.lid,
                flags: ctx.lock_flags(),
                lock_timeout: ctx.lock_timeout_ms(),
            };
            let resp: DeviceError = invoke(
                transport,
                Procedure::DeviceLock,
                &parms,
                ctx.rpc_timeout(self.config.rpc_grace),
            )?;
            check(resp.error, "device_lock")?;
            self.locked.store(true, Ordering::Release);
            log::debug!("Link {} locked {}", info.lid, self.name);
            Ok(())
        })
    }

    pub fn unlock(&self, ctx: &mut CallContext) -> Result<(), Error> {
        self.run(ctx, |transport, info, ctx| {
            let resp: DeviceError = invoke(
                transport,
                Procedure::DeviceUnlock,
                &info.lid,
                ctx.rpc_timeout(self.config.rpc_grace),
            )?;
            match check(resp.error, "device_unlock") {
                Ok(()) => {
                    self.locked.store(false, Ordering::Release);
                    log::debug!("Link {} unlocked {}", info.lid, self.name);
                    Ok(())
                }
                Err(err) => {
                    if err.code() == ErrorCode::NoLockHeldByThisLink {
                        self.locked.store(false, Ordering::Release);
                    }
                    Err(err)
                }
            }
        })
    }

    /// Sends a group execute trigger
    pub fn trigger(&self, ctx: &mut CallContext) -> Result<(), Error> {
        self.generic(ctx, Procedure::DeviceTrigger, "device_trigger")
    }

    /// Sends a selected device clear
    pub fn clear(&self, ctx: &mut CallContext) -> Result<(), Error> {
        self.generic(ctx, Procedure::DeviceClear, "device_clear")
    }

    /// Places the device in remote state
    pub fn remote(&self, ctx: &mut CallContext) -> Result<(), Error> {
        self.generic(ctx, Procedure::DeviceRemote, "device_remote")
    }

    /// Returns the device to local state
    pub fn local(&self, ctx: &mut CallContext) -> Result<(), Error> {
        self.generic(ctx, Procedure::DeviceLocal, "device_local")
    }

    /// Reads the status byte of the device
    pub fn read_status_byte(&self, ctx: &mut CallContext) -> Result<u8, Error> {
        self.run(ctx, |transport, info, ctx| {
            let resp: DeviceReadStbResp = invoke(
                transport,
                Procedure::DeviceReadStb,
                &generic_parms(info, ctx),
                ctx.rpc_timeout(self.config.rpc_grace),
            )?;
            check(resp.error, "device_readstb")?;
            Ok(resp.stb)
        })
    }

    /// Sets the termination character used by reads whose context sets none.
    /// `None` disables it.
    pub fn set_termination_character(
        &self,
        ctx: &mut CallContext,
        term_char: Option<u8>,
    ) -> Result<(), Error> {
        self.run(ctx, |_, _, _| {
            *self.term_char.lock() = term_char;
            Ok(())
        })
    }

    /// Asks the instrument to abort the read or write outstanding on this link.
    ///
    /// The aborted operation fails with [`ErrorCode::Abort`]. Aborting while nothing is
    /// outstanding, or after the link was disconnected, has no effect. Fails with
    /// [`ErrorCode::ChannelNotEstablished`] once the controller is disconnected.
    pub fn abort(&self) -> Result<(), Error> {
        self.ensure_controller()?;
        self.abort
            .abort(&self.host, &self.link, self.config.teardown_timeout)
    }

    fn ensure_controller(&self) -> Result<(), Error> {
        match self.controller.upgrade() {
            Some(shared) if shared.is_connected() => Ok(()),
            _ => Err(Error::not_established("controller is not connected")),
        }
    }

    /// Runs `op` on the core session and records its outcome on `ctx`.
    fn run<T>(
        &self,
        ctx: &mut CallContext,
        op: impl FnOnce(&mut dyn Transport, LinkInfo, &mut CallContext) -> Result<T, Error>,
    ) -> Result<T, Error> {
        ctx.begin();
        let result = self.with_session(ctx, op);
        ctx.finish(result)
    }

    fn with_session<T>(
        &self,
        ctx: &mut CallContext,
        op: impl FnOnce(&mut dyn Transport, LinkInfo, &mut CallContext) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.ensure_controller()?;
        let mut core = self.core.lock();
        let info = *self.link.lock();
        let (Some(transport), Some(info)) = (core.as_mut(), info) else {
            return Err(Error::not_established(format!(
                "no link to {} on {}",
                self.name, self.host
            )));
        };
        let result = op(transport.as_mut(), info, ctx);
        if !transport.is_open() {
            log::warn!(
                "Session to {} on {} closed, link {} is lost",
                self.name,
                self.host,
                info.lid
            );
            *core = None;
            self.forget_link();
        }
        result
    }

    /// Clears the state of a link whose session is gone.
    fn forget_link(&self) {
        *self.link.lock() = None;
        self.locked.store(false, Ordering::Release);
        self.abort.close();
    }

    fn generic(
        &self,
        ctx: &mut CallContext,
        procedure: Procedure,
        operation: &str,
    ) -> Result<(), Error> {
        self.run(ctx, |transport, info, ctx| {
            let resp: DeviceError = invoke(
                transport,
                procedure,
                &generic_parms(info, ctx),
                ctx.rpc_timeout(self.config.rpc_grace),
            )?;
            check(resp.error, operation)
        })
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn generic_parms(info: LinkInfo, ctx: &CallContext) -> DeviceGenericParms {
    DeviceGenericParms {
        lid: info.lid,
        flags: ctx.lock_flags(),
        lock_timeout: ctx.lock_timeout_ms(),
        io_timeout: ctx.io_timeout_ms(),
    }
}

fn write_chunks(
    transport: &mut dyn Transport,
    info: LinkInfo,
    ctx: &mut CallContext,
    data: &[u8],
    config: &Config,
) -> Result<usize, Error> {
    let chunk_size = match info.max_recv_size {
        0 => data.len().max(1),
        size => size as usize,
    };
    let mut offset = 0;
    loop {
        let end = data.len().min(offset + chunk_size);
        let chunk = &data[offset..end];
        let mut flags = ctx.lock_flags();
        if end == data.len() {
            flags |= DeviceFlags::END;
        }
        log::trace!("device_write {:02x?}", chunk);
        let parms = DeviceWriteParms {
            lid: info.lid,
            io_timeout: ctx.io_timeout_ms(),
            lock_timeout: ctx.lock_timeout_ms(),
            flags,
            data: chunk.to_vec(),
        };
        let resp: DeviceWriteResp = invoke(
            transport,
            Procedure::DeviceWrite,
            &parms,
            ctx.rpc_timeout(config.rpc_grace),
        )?;
        let accepted = chunk.len().min(resp.size as usize);
        offset += accepted;
        ctx.set_transferred(offset);
        check(resp.error, "device_write")?;
        if accepted == 0 && !chunk.is_empty() {
            return Err(Error::new(
                ErrorCode::IoError,
                format!("device_write accepted no data at offset {}", offset),
            ));
        }
        log::debug!(
            "Wrote {} of {} bytes to link {}",
            offset,
            data.len(),
            info.lid
        );
        if offset >= data.len() {
            return Ok(offset);
        }
    }
}

fn read_chunks(
    transport: &mut dyn Transport,
    info: LinkInfo,
    ctx: &mut CallContext,
    buf: &mut [u8],
    term_char: Option<u8>,
    config: &Config,
) -> Result<usize, Error> {
    if buf.is_empty() {
        ctx.set_reason(Some(TerminationReason::RequestedCount));
        return Ok(0);
    }
    let mut flags = ctx.lock_flags();
    if term_char.is_some() {
        flags |= DeviceFlags::TERMCHRSET;
    }
    let mut filled = 0;
    loop {
        let requested = buf.len() - filled;
        let parms = DeviceReadParms {
            lid: info.lid,
            request_size: u32::try_from(requested).unwrap_or(u32::MAX),
            io_timeout: ctx.io_timeout_ms(),
            lock_timeout: ctx.lock_timeout_ms(),
            flags,
            term_char: term_char.unwrap_or(0),
        };
        let resp: DeviceReadResp = invoke(
            transport,
            Procedure::DeviceRead,
            &parms,
            ctx.rpc_timeout(config.rpc_grace),
        )?;
        if resp.data.len() > requested {
            return Err(Error::new(
                ErrorCode::RpcError,
                format!(
                    "device_read returned {} bytes, {} requested",
                    resp.data.len(),
                    requested
                ),
            ));
        }
        log::trace!("device_read {:02x?}", resp.data);
        buf[filled..filled + resp.data.len()].copy_from_slice(&resp.data);
        filled += resp.data.len();
        ctx.set_transferred(filled);
        check(resp.error, "device_read")?;

        let mut reason = TerminationReason::from_reason(resp.reason);
        if reason.is_none() && filled == buf.len() {
            reason = Some(TerminationReason::RequestedCount);
        }
        log::debug!(
            "Read {} bytes from link {} ({:?})",
            resp.data.len(),
            info.lid,
            reason
        );
        let finished = match reason {
            Some(TerminationReason::End | TerminationReason::TermChar) => true,
            Some(TerminationReason::RequestedCount) => filled == buf.len(),
            // an empty reply without a reason would otherwise repeat forever
            None => resp.data.is_empty(),
        };
        if !ctx.wait_for_end() || finished {
            ctx.set_reason(reason);
            return Ok(filled);
        }
    }
}
