//! A reliable, fragmenting UDP transport for real-time video: a single
//! sender (`Tx`) and single receiver (`Rx`) exchange fixed-header
//! datagrams, with heartbeat liveness and explicit connect/disconnect
//! lifecycle.
//!
//! Flow control, forward error correction, multi-client fan-out,
//! encryption, multi-path, and in-order delivery across frame boundaries
//! are explicitly out of scope; an embedder builds those on top if needed.

pub mod config;
pub mod conn;
pub mod engine;
pub mod error;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod wire;

pub use config::{Config, ConfigBuilder};
pub use conn::{Connection, State};
pub use engine::{DataKind, Rx, Tx};
pub use error::{Error, Result};
pub use stats::StatsSnapshot;
pub use wire::{FrameType, Header};
