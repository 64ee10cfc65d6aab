//! # VXI-11 Protocol Library
//!
//! This crate provides the wire format of the [VXI-11](https://www.vxibus.org/specifications.html)
//! instrument control protocol, used to talk to oscilloscopes, signal generators and
//! LAN/GPIB gateways over TCP.
//!
//! ## Overview
//!
//! VXI-11 is defined as a set of ONC-RPC programs. This library implements the messages of
//! those programs and the small part of ONC-RPC they travel in, allowing you to:
//!
//! - Serialize and deserialize the VXI-11 core and abort channel messages as XDR
//! - Build and parse RPC call and reply headers
//! - Frame RPC records on a TCP stream (record marking)
//! - Look up program ports through the portmapper
//!
//! ## Channels
//!
//! - **Core channel** (`DEVICE_CORE`, `0x0607AF`): `create_link`, `device_write`, `device_read`,
//!   `device_lock`, `destroy_link` and the remaining device operations
//! - **Abort channel** (`DEVICE_ASYNC`, `0x0607B0`): `device_abort`, used to cancel a call that is
//!   outstanding on the core channel
//!
//! The interrupt channel (`DEVICE_INTR`) is not covered.
//!
//! ## Basic Usage
//!
//! ### Encoding a Request
//!
//! ```
//! use vxi11_protocol::codec::Encode;
//! use vxi11_protocol::{DeviceFlags, DeviceWriteParms, LinkId};
//!
//! let parms = DeviceWriteParms {
//!     lid: LinkId(0),
//!     io_timeout: 1000,
//!     lock_timeout: 0,
//!     flags: DeviceFlags::END,
//!     data: b"*IDN?\n".to_vec(),
//! };
//! let bytes = parms.to_bytes().expect("Writing to vector shouldn't fail");
//! assert_eq!(bytes.len(), 5 * 4 + 8);
//! ```
//!
//! ### Decoding a Reply
//!
//! ```
//! use vxi11_protocol::codec::Decode;
//! use vxi11_protocol::{DeviceErrorCode, DeviceReadResp, ReadReason};
//!
//! let reply = b"\x00\x00\x00\x00\x00\x00\x00\x04\x00\x00\x00\x03ok\n\x00";
//! let resp = DeviceReadResp::from_bytes(reply).expect("Reply should parse");
//! assert_eq!(resp.error, DeviceErrorCode::NoError);
//! assert!(resp.reason.contains(ReadReason::END));
//! assert_eq!(resp.data, b"ok\n");
//! ```
//!
//! ## Error Handling
//!
//! This library uses the [`error::ReadError`] type for decoding errors.
//!
//! ## Feature Flags
//!
//! - `tokio`: adds [`framing::RecordCodec`], a `tokio_util` codec for RPC records
//!
//! ## Thread Safety
//!
//! The types in this library are plain data and can be shared across threads.
//! I/O operations (reading/writing) are not synchronized and require external coordination.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framing;
pub mod rpc;
pub mod xdr;
