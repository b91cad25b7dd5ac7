//! A scripted in-memory editor host.
//!
//! Stands in for a real editor so one endpoint can run headless: it holds a
//! fake open file, moves its caret when told to, and logs every scroll the
//! peer drives instead of repainting a viewport.

use parking_lot::Mutex;
use std::path::PathBuf;
use tandem_core::EditorHost;
use tracing::info;

const VIEWPORT_LINES: u32 = 40;

pub struct ScriptedHost {
    file: PathBuf,
    line_count: u32,
    caret: Mutex<(u32, u32)>,
}

impl ScriptedHost {
    pub fn new(file: impl Into<PathBuf>, line_count: u32) -> Self {
        Self {
            file: file.into(),
            line_count,
            caret: Mutex::new((0, 0)),
        }
    }

    /// Advance the caret one line, wrapping at the end of the file.
    pub fn step_caret(&self) -> (u32, u32) {
        let mut caret = self.caret.lock();
        caret.0 = (caret.0 + 1) % self.line_count;
        *caret
    }
}

impl EditorHost for ScriptedHost {
    fn active_file(&self) -> Option<PathBuf> {
        Some(self.file.clone())
    }

    fn caret_position(&self) -> (u32, u32) {
        *self.caret.lock()
    }

    fn visible_line_range(&self) -> Option<(u32, u32)> {
        let (line, _) = *self.caret.lock();
        let start = line.saturating_sub(VIEWPORT_LINES / 2);
        Some((start, (start + VIEWPORT_LINES).min(self.line_count.saturating_sub(1))))
    }

    fn line_count(&self) -> u32 {
        self.line_count
    }

    fn scroll_to_line(&self, line: u32) -> tandem_core::Result<()> {
        info!(line, "Peer scrolled our viewport");
        Ok(())
    }

    fn has_window_focus(&self) -> bool {
        true
    }
}
