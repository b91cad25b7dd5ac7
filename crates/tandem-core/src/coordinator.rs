//! The state coordinator.
//!
//! Sits between the editor adapter and the sync channel: turns the storm of
//! raw local events into a minimal outbound stream (immediate for
//! OPEN/CLOSE, debounced last-event-wins for NAVIGATE/SCROLL), and applies
//! inbound peer state to the local editor without feedback loops.

use crate::host::EditorHost;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::{compatible_paths, normalize_path, EditorSource, EditorState, SyncAction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a NAVIGATE/SCROLL burst must go quiet before its final state
/// is sent.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

/// One pending debounce timer. The generation ties a spawned timer task to
/// the map entry it owns; a replaced or cancelled timer that fires late
/// finds a different generation and does nothing.
struct DebounceSlot {
    generation: u64,
    task: JoinHandle<()>,
}

type TimerMap = Mutex<HashMap<String, DebounceSlot>>;

/// Point-in-time view of the local editor, read through the host.
struct Snapshot {
    path: String,
    line: u32,
    column: u32,
    range: Option<(u32, u32)>,
}

/// Coordinates state flow between one editor and its peer.
pub struct StateCoordinator {
    source: EditorSource,
    host: Arc<dyn EditorHost>,
    outbound: mpsc::UnboundedSender<EditorState>,
    timers: Arc<TimerMap>,
    next_generation: AtomicU64,
    debounce_delay: Duration,
    focused: AtomicBool,
    peer_active: AtomicBool,
    disposed: AtomicBool,
}

impl StateCoordinator {
    /// Create a coordinator for the given side.
    ///
    /// `outbound` receives every state this side decides to send; the host
    /// glue forwards it to the sync channel.
    pub fn new(
        source: EditorSource,
        host: Arc<dyn EditorHost>,
        outbound: mpsc::UnboundedSender<EditorState>,
    ) -> Self {
        let focused = host.has_window_focus();
        Self {
            source,
            host,
            outbound,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            debounce_delay: DEBOUNCE_DELAY,
            focused: AtomicBool::new(focused),
            peer_active: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Override the debounce delay. Tests run the timer machinery at
    /// millisecond scale.
    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    /// Which side this coordinator speaks for.
    pub fn source(&self) -> EditorSource {
        self.source
    }

    // ─── Outbound: immediate path ────────────────────────────────────────

    /// Publish a state now, bypassing debouncing. Used for the discrete,
    /// low-frequency actions (OPEN, CLOSE) and for focus-change resends.
    ///
    /// A CLOSE first cancels any pending debounce timer for its path, so a
    /// closed file can never emit a stale deferred NAVIGATE/SCROLL.
    pub fn update_state(&self, state: EditorState) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        if state.is_close() {
            let key = normalize_path(&state.file_path);
            let mut timers = self.timers.lock();
            if let Some(slot) = timers.remove(&key) {
                slot.task.abort();
                debug!(path = %key, "Cancelled pending debounce for closed file");
            }
        }

        self.publish(state);
    }

    // ─── Outbound: debounced path ────────────────────────────────────────

    /// Schedule a state for sending after the debounce delay.
    ///
    /// Keyed per file path, last event wins: a newer state for the same
    /// path replaces the pending one and restarts the delay. Each path has
    /// at most one outstanding timer.
    pub fn debounced_update_state(&self, state: EditorState) {
        let key = normalize_path(&state.file_path);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let timers = Arc::clone(&self.timers);
        let outbound = self.outbound.clone();
        let delay = self.debounce_delay;
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire_slot(&timers, &task_key, generation, &outbound, state);
        });

        let mut timers = self.timers.lock();
        if self.disposed.load(Ordering::SeqCst) {
            task.abort();
            return;
        }
        if let Some(previous) = timers.insert(key, DebounceSlot { generation, task }) {
            previous.task.abort();
        }
    }

    fn publish(&self, state: EditorState) {
        if self.outbound.send(state).is_err() {
            warn!("Outbound subscriber gone, dropping state");
        }
    }

    // ─── Event entry points (called by the editor adapter) ───────────────

    /// A file became the active editor. Immediate.
    pub fn file_opened(&self) {
        let Some(snap) = self.snapshot() else {
            return;
        };
        self.update_state(EditorState::open(
            snap.path,
            snap.line,
            snap.column,
            self.source,
            self.has_focus(),
        ));
    }

    /// A file was closed in its last tab/view. Immediate.
    ///
    /// The adapter calls this only once the file is no longer open in any
    /// tab or view; a close of one duplicate tab emits nothing.
    pub fn file_closed(&self, path: &Path) {
        self.update_state(EditorState::close(
            path.to_string_lossy(),
            self.source,
            self.has_focus(),
        ));
    }

    /// The caret moved. Debounced.
    pub fn selection_changed(&self) {
        let Some(snap) = self.snapshot() else {
            return;
        };
        let mut state = EditorState::navigate(
            snap.path,
            snap.line,
            snap.column,
            self.source,
            self.has_focus(),
        );
        if let Some((start, end)) = snap.range {
            state = state.with_visible_range(start, end);
        }
        self.debounced_update_state(state);
    }

    /// The viewport moved. Debounced. A host that cannot report its
    /// visible range produces nothing.
    pub fn visible_range_changed(&self) {
        let Some(snap) = self.snapshot() else {
            return;
        };
        let Some(range) = snap.range else {
            return;
        };
        self.debounced_update_state(EditorState::scroll(
            snap.path,
            snap.line,
            snap.column,
            self.source,
            self.has_focus(),
            range,
        ));
    }

    /// OS focus moved onto or off this editor's window. Immediate: the
    /// peer learns right away which side is live, with the full current
    /// position attached.
    pub fn window_focus_changed(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
        let Some(snap) = self.snapshot() else {
            return;
        };
        let mut state =
            EditorState::navigate(snap.path, snap.line, snap.column, self.source, focused);
        if let Some((start, end)) = snap.range {
            state = state.with_visible_range(start, end);
        }
        self.update_state(state);
    }

    /// Whether this side currently holds OS focus.
    pub fn has_focus(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    /// Whether the peer reported itself focused in its last state.
    pub fn peer_active(&self) -> bool {
        self.peer_active.load(Ordering::SeqCst)
    }

    // ─── Inbound ─────────────────────────────────────────────────────────

    /// Apply a state received from the peer to the local editor.
    ///
    /// Applies only when the record's path matches the currently active
    /// local file; anything else is ignored, and in particular no file is
    /// ever opened implicitly. Scroll targets are clamped to the local
    /// document's line range.
    pub fn apply_remote(&self, state: &EditorState) {
        self.peer_active.store(state.is_active, Ordering::SeqCst);

        // The channel only delivers peer messages, but a record claiming
        // our own source must never loop back into the editor.
        if state.source == self.source {
            warn!(source = %state.source, "Discarding self-echoed state");
            return;
        }

        if state.action == SyncAction::Close {
            debug!(path = %state.file_path, "Peer closed file");
            return;
        }

        let Some(active) = self.host.active_file() else {
            debug!("No active local file, ignoring remote state");
            return;
        };
        let active = active.to_string_lossy();
        if !compatible_paths(&active, &state.file_path) {
            debug!(
                local = %active,
                remote = %state.file_path,
                "Remote state is for a different file, ignoring"
            );
            return;
        }

        let target = match state.action {
            SyncAction::Scroll => match state.visible_range_start {
                Some(start) => start,
                None => {
                    debug!("Scroll without visible range, ignoring");
                    return;
                }
            },
            _ => state.line,
        };

        let line_count = self.host.line_count();
        if line_count == 0 {
            debug!("Local document is empty, ignoring remote state");
            return;
        }
        let clamped = target.min(line_count - 1);

        if let Err(e) = self.host.scroll_to_line(clamped) {
            warn!(error = %e, line = clamped, "Editor rejected scroll, abandoning state");
        }
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Cancel every pending debounce timer and stop accepting new state.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        let mut timers = self.timers.lock();
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = timers.len();
        for (_, slot) in timers.drain() {
            slot.task.abort();
        }
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending debounce timers on dispose");
        }
    }

    fn snapshot(&self) -> Option<Snapshot> {
        let path = self.host.active_file()?;
        let (line, column) = self.host.caret_position();
        Some(Snapshot {
            path: path.to_string_lossy().into_owned(),
            line,
            column,
            range: self.host.visible_line_range(),
        })
    }
}

impl Drop for StateCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A debounce timer elapsed. Compare-and-remove the slot first, publish
/// second: the map entry is cleaned up no matter what happens to the
/// publish, and a stale timer whose slot was replaced does nothing.
fn fire_slot(
    timers: &TimerMap,
    key: &str,
    generation: u64,
    outbound: &mpsc::UnboundedSender<EditorState>,
    state: EditorState,
) {
    {
        let mut map = timers.lock();
        match map.get(key) {
            Some(slot) if slot.generation == generation => {
                map.remove(key);
            }
            _ => {
                debug!(path = %key, "Stale debounce timer, skipping");
                return;
            }
        }
    }

    if outbound.send(state).is_err() {
        warn!(path = %key, "Outbound subscriber gone, dropping debounced state");
    }
}
