//! # Tandem Sync Channel
//!
//! Owns the persistent duplex connection between the two editors. One side
//! listens on a configurable port, the other connects with unlimited retry;
//! each serialized [`EditorState`](tandem_protocol::EditorState) travels as
//! one WebSocket text frame, so message boundaries come from the transport
//! and no extra framing is layered on top.
//!
//! Delivery guarantees are deliberately weak: per-side send order is
//! preserved on an active connection, and anything sent while disconnected
//! is dropped. Heartbeat pings detect half-open connections; transport
//! failures of any kind feed the reconnect path and are never fatal.

mod channel;
pub mod config;
mod error;

pub use channel::SyncChannel;
pub use config::SyncConfig;
pub use error::{Error, Result};
