//! Open-view bookkeeping for the close hook.
//!
//! Editors report a close per tab or view, but the protocol's CLOSE means
//! "this file is gone everywhere on my side". Adapters feed every native
//! open/close into this tracker and only forward a CLOSE to the
//! coordinator when the last view of a file goes away.

use parking_lot::Mutex;
use std::collections::HashMap;
use tandem_protocol::normalize_path;

/// Counts open views per file path.
#[derive(Default)]
pub struct OpenFileTracker {
    views: Mutex<HashMap<String, usize>>,
}

impl OpenFileTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// A view of `path` was opened.
    pub fn opened(&self, path: &str) {
        let mut views = self.views.lock();
        *views.entry(normalize_path(path)).or_insert(0) += 1;
    }

    /// A view of `path` was closed. Returns `true` when that was the last
    /// view, the only case where a CLOSE should cross the wire.
    pub fn closed(&self, path: &str) -> bool {
        let key = normalize_path(path);
        let mut views = self.views.lock();
        match views.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                views.remove(&key);
                true
            }
            // A close we never saw an open for still counts as gone.
            None => true,
        }
    }

    /// Whether any view of `path` is open.
    pub fn is_open(&self, path: &str) -> bool {
        self.views.lock().contains_key(&normalize_path(path))
    }
}
