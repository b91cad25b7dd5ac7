//! # Tandem State Coordinator
//!
//! The layer between an editor adapter and the sync channel. Outbound, it
//! deduplicates and debounces raw editor events into a minimal stream of
//! [`EditorState`](tandem_protocol::EditorState) records; inbound, it
//! applies peer state to the local editor with loop suppression, an
//! active-file filter, and line clamping.
//!
//! The coordinator is editor-agnostic: everything editor-API-specific sits
//! behind the [`EditorHost`] trait, implemented by each side's adapter.

mod coordinator;
mod error;
mod host;
mod tracker;

pub use coordinator::{StateCoordinator, DEBOUNCE_DELAY};
pub use error::{Error, Result};
pub use host::EditorHost;
pub use tracker::OpenFileTracker;
