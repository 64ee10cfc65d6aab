use std::{fmt, sync::Arc, time::Duration};

use crate::{
    controller::Controller,
    tcp::{TcpConfig, TcpConnector},
    transport::Connector,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Port of the core channel. `None` asks the portmapper of the host.
    pub port: Option<u16>,
    /// Added to the instrument's time budget to bound each round trip on the client side
    pub rpc_grace: Duration,
    /// Bound of the round trips that carry no call context: `destroy_link` and `device_abort`
    pub teardown_timeout: Duration,
    /// Identifier sent in `create_link`, only used by instruments for reporting
    pub client_id: i32,
    pub tcp: TcpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            rpc_grace: Duration::from_secs(2),
            teardown_timeout: Duration::from_secs(2),
            client_id: std::process::id() as i32,
            tcp: TcpConfig::default(),
        }
    }
}

/// Builder to create a [Controller] and modify configuration options
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vxi11_client::Builder;
///
/// let controller = Builder::new()
///     .port(1024)
///     .connect_timeout(Duration::from_secs(1))
///     .build("192.168.0.10", "inst0");
/// assert!(!controller.is_connected());
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
    connector: Option<Arc<dyn Connector>>,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Connect the core channel to this port instead of asking the portmapper
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Port of the portmapper, 111 by default
    pub fn portmapper_port(mut self, port: u16) -> Self {
        self.config.tcp.portmapper_port = port;
        self
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.tcp.connect_timeout = timeout;
        self
    }

    /// Set the margin added to the instrument's timeouts for each round trip
    pub fn rpc_grace(mut self, grace: Duration) -> Self {
        self.config.rpc_grace = grace;
        self
    }

    /// Set the timeout of `destroy_link` and `device_abort`
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.config.teardown_timeout = timeout;
        self
    }

    pub fn client_id(mut self, id: i32) -> Self {
        self.config.client_id = id;
        self
    }

    /// Set the largest reply accepted from the instrument
    pub fn max_record_len(mut self, len: usize) -> Self {
        self.config.tcp.max_record_len = len;
        self
    }

    /// Use `connector` for all sessions instead of TCP
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build a disconnected controller for `device_name` on `host`
    pub fn build(self, host: impl Into<String>, device_name: impl Into<String>) -> Controller {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::new(self.config.tcp.clone())),
        };
        Controller::new(host.into(), device_name.into(), self.config, connector)
    }
}
