//! # VXI-11 Client
//!
//! A Rust client library for controlling laboratory instruments over the VXI-11
//! protocol, either LAN instruments directly or GPIB instruments behind a LAN/GPIB gateway.
//!
//! ## Overview
//!
//! A [`Controller`] represents one network endpoint. After [`Controller::connect`] it
//! creates [`DeviceLink`]s, one per addressed instrument, through which messages are
//! written and read. The crate takes care of link management, splitting writes at the
//! instrument's transfer limit, read termination, locking and the separate abort channel.
//!
//! For the wire format, see the [`vxi11_protocol`](https://docs.rs/vxi11-protocol/) crate.
//!
//! ## Basic Usage
//!
//! ### Querying an Instrument
//!
//! ```no_run
//! use vxi11_client::{CallContext, Controller, DeviceAddress, TerminationReason};
//!
//! let controller = Controller::with_defaults("192.168.0.10", "hpib");
//! let mut ctx = CallContext::new();
//! controller.connect(&mut ctx)?;
//!
//! let device = controller.create_device(&mut ctx, DeviceAddress::with_secondary(20, 0))?;
//! device.write(&mut ctx, b"*idn?")?;
//! let mut buf = [0; 50];
//! let len = device.read(&mut ctx, &mut buf)?;
//! assert_eq!(ctx.termination_reason(), Some(TerminationReason::End));
//! println!("{}", String::from_utf8_lossy(&buf[..len]));
//! # Ok::<(), vxi11_client::Error>(())
//! ```
//!
//! ### Reading Long Responses
//!
//! A single [`DeviceLink::read`] returns after the first reply of the instrument.
//! Responses larger than that are read by calling it until the termination reason is
//! [`TerminationReason::End`]:
//!
//! ```ignore
//! let mut response = Vec::new();
//! let mut buf = [0; 512];
//! loop {
//!     let len = device.read(&mut ctx, &mut buf)?;
//!     response.extend_from_slice(&buf[..len]);
//!     if ctx.termination_reason() == Some(TerminationReason::End) {
//!         break;
//!     }
//! }
//! ```
//!
//! ### Errors
//!
//! Every operation records a [`Status`] on its [`CallContext`] and also returns the
//! [`Error`]. [`ErrorCode`] is a closed set; [`ErrorCode::is_retryable`] and
//! [`ErrorCode::requires_new_link`] tell how to recover. Nothing is retried automatically.
//!
//! ## Threads
//!
//! Controllers and device links are `Send + Sync`. Operations on one device link are
//! serialized. [`DeviceLink::abort`] may be called from another thread while a read or
//! write is outstanding; the outstanding operation then fails with [`ErrorCode::Abort`].
//!
//! ## Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log/) facade: connections at `info`,
//! each RPC round trip at `debug` and payload bytes at `trace`.
//!
//! ## Related Crates
//!
//! - [`vxi11_protocol`](https://docs.rs/vxi11-protocol/) - Message encoding/decoding
mod abort;
mod config;
mod context;
mod controller;
mod device;
mod error;
mod link;
pub mod tcp;
pub mod transport;

pub use config::{Builder, Config};
pub use context::{CallContext, DEFAULT_IO_TIMEOUT, TerminationReason};
pub use controller::Controller;
pub use device::DeviceLink;
pub use error::{Error, ErrorCode, Status};
pub use link::{DeviceAddress, MAX_BUS_ADDRESS};
pub use tcp::{TcpConfig, TcpConnector, TcpTransport};
pub use transport::{Connector, Endpoint, Transport};
