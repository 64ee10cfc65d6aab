use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use vxi11_protocol::{DOCMD_REN, DeviceDocmdParms, DeviceDocmdResp, Procedure, Program};

use crate::{
    config::{Builder, Config},
    context::CallContext,
    device::DeviceLink,
    error::{Error, check},
    link::{self, DeviceAddress, LinkInfo},
    transport::{Connector, Endpoint, Transport, invoke},
};

/// State of a controller that its device links observe.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    connected: AtomicBool,
    remote_enable: AtomicBool,
}

impl Shared {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn remote_enable(&self) -> bool {
        self.remote_enable.load(Ordering::Acquire)
    }
}

struct Connection {
    transport: Box<dyn Transport>,
    info: LinkInfo,
}

/// A network endpoint: a LAN instrument or a LAN/GPIB gateway.
///
/// The controller holds its own session and a link to the configured device name (the
/// interface, e.g. `gpib0` or `hpib`, on gateways). Device links created from it open
/// their own sessions and stay independent: disconnecting the controller does not destroy
/// them, but every later operation on them fails with
/// [`ErrorCode::ChannelNotEstablished`](crate::ErrorCode::ChannelNotEstablished).
///
/// Dropping a connected controller disconnects it.
pub struct Controller {
    host: String,
    device_name: String,
    config: Config,
    connector: Arc<dyn Connector>,
    connection: Mutex<Option<Connection>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("host", &self.host)
            .field("device_name", &self.device_name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Controller {
    pub(crate) fn new(
        host: String,
        device_name: String,
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Controller {
        Controller {
            host,
            device_name,
            config,
            connector,
            connection: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        }
    }

    /// A controller for `device_name` on `host` with the default configuration
    pub fn with_defaults(host: impl Into<String>, device_name: impl Into<String>) -> Controller {
        Builder::new().build(host, device_name)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Opens the session to the host and links to the device name.
    /// On failure the controller stays disconnected. Connecting twice is a no-op, unless
    /// the session was lost in between, e.g. after a timeout.
    pub fn connect(&self, ctx: &mut CallContext) -> Result<(), Error> {
        ctx.begin();
        let result = self.try_connect(ctx);
        ctx.finish(result)
    }

    fn try_connect(&self, ctx: &CallContext) -> Result<(), Error> {
        let mut connection = self.connection.lock();
        if connection
            .as_ref()
            .is_some_and(|current| current.transport.is_open())
        {
            log::debug!("Controller for {} is already connected", self.host);
            return Ok(());
        }
        *connection = None;
        let mut transport = self.connector.session();
        transport.open(&Endpoint::new(
            self.host.as_str(),
            self.config.port,
            Program::Core,
        ))?;
        let info = match link::create_link(
            transport.as_mut(),
            ctx,
            &self.device_name,
            self.config.client_id,
            self.config.rpc_grace,
        ) {
            Ok(info) => info,
            Err(err) => {
                transport.close();
                return Err(err);
            }
        };
        *connection = Some(Connection { transport, info });
        self.shared.connected.store(true, Ordering::Release);
        log::info!(
            "Controller connected to {} on {} (link {})",
            self.device_name,
            self.host,
            info.lid
        );
        Ok(())
    }

    /// Creates a link to the device at `address`.
    ///
    /// Fails with [`ErrorCode::ChannelNotEstablished`](crate::ErrorCode::ChannelNotEstablished)
    /// without any network I/O if the controller is not connected, and with
    /// [`ErrorCode::InvalidAddress`](crate::ErrorCode::InvalidAddress) for addresses out of range.
    pub fn create_device(
        &self,
        ctx: &mut CallContext,
        address: DeviceAddress,
    ) -> Result<DeviceLink, Error> {
        ctx.begin();
        let result = self.try_create_device(ctx, address);
        ctx.finish(result)
    }

    fn try_create_device(
        &self,
        ctx: &CallContext,
        address: DeviceAddress,
    ) -> Result<DeviceLink, Error> {
        if !self.is_connected() {
            return Err(Error::not_established("controller is not connected"));
        }
        let name = address.link_name(&self.device_name)?;
        let device = DeviceLink::new(
            self.host.clone(),
            name,
            address,
            Arc::downgrade(&self.shared),
            self.connector.clone(),
            self.config.clone(),
        );
        device.establish(ctx)?;
        Ok(device)
    }

    /// Asserts or releases remote enable (REN) on the bus.
    ///
    /// This affects every device behind this endpoint, including those driven by other
    /// device links at the same time.
    pub fn set_remote_enable(&self, ctx: &mut CallContext, enable: bool) -> Result<(), Error> {
        ctx.begin();
        let result = self.try_set_remote_enable(ctx, enable);
        ctx.finish(result)
    }

    fn try_set_remote_enable(&self, ctx: &CallContext, enable: bool) -> Result<(), Error> {
        let mut guard = self.connection.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| Error::not_established("controller is not connected"))?;
        let parms = DeviceDocmdParms {
            lid: connection.info.lid,
            flags: ctx.lock_flags(),
            io_timeout: ctx.io_timeout_ms(),
            lock_timeout: ctx.lock_timeout_ms(),
            cmd: DOCMD_REN,
            network_order: true,
            datasize: 2,
            data_in: vec![0, enable as u8],
        };
        let resp: Result<DeviceDocmdResp, Error> = invoke(
            connection.transport.as_mut(),
            Procedure::DeviceDocmd,
            &parms,
            ctx.rpc_timeout(self.config.rpc_grace),
        );
        if !connection.transport.is_open() {
            log::warn!(
                "Session to {} closed, controller link {} is lost",
                self.host,
                connection.info.lid
            );
            *guard = None;
            self.shared.connected.store(false, Ordering::Release);
        }
        check(resp?.error, "device_docmd(REN)")?;
        self.shared.remote_enable.store(enable, Ordering::Release);
        log::debug!("Remote enable on {} set to {}", self.host, enable);
        Ok(())
    }

    /// Destroys the controller's link and closes its session. Calling it again has no effect.
    pub fn disconnect(&self) {
        let Some(mut connection) = self.connection.lock().take() else {
            return;
        };
        self.shared.connected.store(false, Ordering::Release);
        if let Err(err) = link::destroy_link(
            connection.transport.as_mut(),
            connection.info.lid,
            self.config.teardown_timeout,
        ) {
            log::warn!("Could not destroy link {}: {}", connection.info.lid, err);
        }
        connection.transport.close();
        log::info!("Controller disconnected from {}", self.host);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// The remote enable state last set through [`Controller::set_remote_enable`]
    pub fn remote_enable(&self) -> bool {
        self.shared.remote_enable()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.disconnect();
    }
}
