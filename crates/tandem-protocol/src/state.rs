//! The `EditorState` record and its wire encoding.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// What kind of editor event a state record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    /// A file became the active editor.
    Open,
    /// The caret moved within the active file.
    Navigate,
    /// The visible viewport changed.
    Scroll,
    /// A file was closed in every tab and view.
    Close,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Navigate => write!(f, "NAVIGATE"),
            Self::Scroll => write!(f, "SCROLL"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// Which endpoint produced a state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EditorSource {
    /// The JetBrains-family IDE side.
    Jetbrains,
    /// The VSCode-family editor side.
    Vscode,
}

impl fmt::Display for EditorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jetbrains => write!(f, "JETBRAINS"),
            Self::Vscode => write!(f, "VSCODE"),
        }
    }
}

/// One synchronized editor state change.
///
/// This is the only message type on the wire. A record is built fresh per
/// local event, optionally held in a debounce slot, sent once, and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    /// The event kind.
    pub action: SyncAction,
    /// Absolute, OS-native path of the file the event concerns.
    pub file_path: String,
    /// Zero-based caret line. Always 0 for CLOSE.
    pub line: u32,
    /// Zero-based caret column. Always 0 for CLOSE.
    pub column: u32,
    /// The endpoint that produced this record.
    pub source: EditorSource,
    /// Whether the producing window held OS focus at event time.
    pub is_active: bool,
    /// Wall-clock timestamp in epoch milliseconds, as a string.
    pub timestamp: String,
    /// Producer-local vertical pixel offset. Not portable across editors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_top: Option<u32>,
    /// Producer-local horizontal pixel offset. Not portable across editors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_left: Option<u32>,
    /// First visible line of the viewport. Portable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_range_start: Option<u32>,
    /// Last visible line of the viewport. Portable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_range_end: Option<u32>,
}

/// Millisecond timestamps must be strictly increasing per process even when
/// two events land in the same wall-clock millisecond.
fn next_timestamp() -> String {
    static LAST: AtomicI64 = AtomicI64::new(0);

    let now = chrono::Utc::now().timestamp_millis();
    loop {
        let prev = LAST.load(Ordering::SeqCst);
        let candidate = now.max(prev + 1);
        if LAST
            .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate.to_string();
        }
    }
}

impl EditorState {
    /// A file became the active editor.
    pub fn open(
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        source: EditorSource,
        is_active: bool,
    ) -> Self {
        Self::new(SyncAction::Open, file_path, line, column, source, is_active)
    }

    /// The caret moved. Viewport information rides along when available so a
    /// focus-regain resend carries the full picture.
    pub fn navigate(
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        source: EditorSource,
        is_active: bool,
    ) -> Self {
        Self::new(
            SyncAction::Navigate,
            file_path,
            line,
            column,
            source,
            is_active,
        )
    }

    /// The viewport changed. `visible_range` is the portable first/last
    /// visible line pair.
    pub fn scroll(
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        source: EditorSource,
        is_active: bool,
        visible_range: (u32, u32),
    ) -> Self {
        let mut state = Self::new(
            SyncAction::Scroll,
            file_path,
            line,
            column,
            source,
            is_active,
        );
        state.visible_range_start = Some(visible_range.0);
        state.visible_range_end = Some(visible_range.1);
        state
    }

    /// A file was closed everywhere. CLOSE carries only identity and
    /// liveness, never position or viewport.
    pub fn close(file_path: impl Into<String>, source: EditorSource, is_active: bool) -> Self {
        Self::new(SyncAction::Close, file_path, 0, 0, source, is_active)
    }

    fn new(
        action: SyncAction,
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        source: EditorSource,
        is_active: bool,
    ) -> Self {
        Self {
            action,
            file_path: file_path.into(),
            line,
            column,
            source,
            is_active,
            timestamp: next_timestamp(),
            scroll_top: None,
            scroll_left: None,
            visible_range_start: None,
            visible_range_end: None,
        }
    }

    /// Attach the portable viewport range to a record.
    pub fn with_visible_range(mut self, start: u32, end: u32) -> Self {
        self.visible_range_start = Some(start);
        self.visible_range_end = Some(end);
        self
    }

    /// Attach producer-local pixel offsets to a record.
    pub fn with_scroll_offsets(mut self, top: u32, left: u32) -> Self {
        self.scroll_top = Some(top);
        self.scroll_left = Some(left);
        self
    }

    /// Whether this record closes a file.
    pub fn is_close(&self) -> bool {
        self.action == SyncAction::Close
    }

    /// Whether both viewport range fields are present.
    pub fn has_visible_range(&self) -> bool {
        self.visible_range_start.is_some() && self.visible_range_end.is_some()
    }

    /// Serialize to one wire message.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize one wire message and check its invariants.
    pub fn decode(text: &str) -> Result<Self> {
        let state: Self = serde_json::from_str(text)?;
        state.validate()?;
        Ok(state)
    }

    /// Check protocol invariants on a parsed record.
    ///
    /// The channel drops records that fail here, the same way it drops
    /// records that fail to parse at all.
    pub fn validate(&self) -> Result<()> {
        match (self.visible_range_start, self.visible_range_end) {
            (Some(start), Some(end)) if start > end => {
                return Err(Error::InvalidRecord(format!(
                    "visible range start {} exceeds end {}",
                    start, end
                )));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::InvalidRecord(
                    "visible range fields must be present together".to_string(),
                ));
            }
            _ => {}
        }

        if self.action == SyncAction::Close {
            if self.line != 0 || self.column != 0 {
                return Err(Error::InvalidRecord(
                    "CLOSE must not carry a caret position".to_string(),
                ));
            }
            if self.scroll_top.is_some()
                || self.scroll_left.is_some()
                || self.has_visible_range()
            {
                return Err(Error::InvalidRecord(
                    "CLOSE must not carry viewport fields".to_string(),
                ));
            }
        }

        Ok(())
    }
}
