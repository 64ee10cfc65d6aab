//! Test doubles for the VXI-11 client: a simulated instrument, an in-memory connector
//! and a tokio based RPC responder serving the instrument over TCP.
pub mod instrument;
pub mod memory;
pub mod responder;

pub use instrument::{IDN, Instrument, InstrumentConfig};
pub use memory::MemoryConnector;
pub use responder::Responder;
