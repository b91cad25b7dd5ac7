//! Shared wire protocol for Tandem editor synchronization.
//!
//! Both endpoints, the JetBrains plugin and the VSCode extension, exchange
//! exactly one record type, [`EditorState`], over the sync channel. This crate
//! owns that record: its construction, JSON encoding, validation, and the
//! cross-platform path comparison both sides use to decide whether two states
//! refer to the same file.

mod error;
mod paths;
mod state;

pub use error::{Error, Result};
pub use paths::{compatible_paths, normalize_path};
pub use state::{EditorSource, EditorState, SyncAction};
