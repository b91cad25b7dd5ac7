//! The duplex sync channel.
//!
//! One side listens, the other connects; between them there is exactly one
//! logical connection at a time. The listener keeps a single peer slot, and
//! a newly accepted connection replaces whatever was in it. The connector
//! retries forever on a fixed interval until the listener appears, and goes
//! back to retrying whenever the connection dies.
//!
//! Delivery is liveness-bound: `send` writes to the active connection or
//! drops the record. Nothing is queued across disconnects; the next
//! qualifying editor event re-establishes current state on its own.

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tandem_protocol::EditorState;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The single peer connection slot.
///
/// Explicit state instead of a nullable handle so replacement races are
/// easy to reason about: every installed connection carries a generation,
/// and teardown only vacates the slot if its generation still matches.
enum PeerSlot {
    Vacant,
    Active(PeerHandle),
}

struct PeerHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

struct SlotState {
    next_generation: u64,
    peer: PeerSlot,
}

struct ChannelInner {
    config: SyncConfig,
    slot: Mutex<SlotState>,
    inbound_tx: mpsc::UnboundedSender<EditorState>,
    status_tx: watch::Sender<bool>,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
}

/// Handle to one endpoint of the duplex sync connection.
///
/// Cloneable and cheap; all clones share the same connection slot and
/// shutdown token.
#[derive(Clone)]
pub struct SyncChannel {
    inner: Arc<ChannelInner>,
}

impl SyncChannel {
    /// Bind the configured port and accept peer connections.
    ///
    /// At most one peer is active at a time; a new incoming connection
    /// replaces the previous one. Returns the channel handle and the
    /// receiver on which decoded inbound states arrive in receipt order.
    pub async fn listen(
        config: SyncConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EditorState>)> {
        if !config.enabled {
            return Ok(Self::inert(config));
        }

        let addr = config.addr();
        let listener = TcpListener::bind(&addr).await.map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().ok();

        let (channel, inbound_rx) = Self::build(config, local_addr);
        info!(%addr, "Sync channel listening");

        let inner = channel.inner.clone();
        tokio::spawn(accept_loop(listener, inner));

        Ok((channel, inbound_rx))
    }

    /// Dial the configured peer, retrying forever on a fixed interval.
    ///
    /// Returns immediately; connection establishment happens in the
    /// background and `status()` flips when it succeeds.
    pub fn connect(config: SyncConfig) -> (Self, mpsc::UnboundedReceiver<EditorState>) {
        if !config.enabled {
            return Self::inert(config);
        }

        let (channel, inbound_rx) = Self::build(config, None);
        let inner = channel.inner.clone();
        tokio::spawn(connect_loop(inner));

        (channel, inbound_rx)
    }

    fn build(
        config: SyncConfig,
        local_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<EditorState>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(false);

        let inner = Arc::new(ChannelInner {
            config,
            slot: Mutex::new(SlotState {
                next_generation: 0,
                peer: PeerSlot::Vacant,
            }),
            inbound_tx,
            status_tx,
            shutdown: CancellationToken::new(),
            local_addr,
        });

        (Self { inner }, inbound_rx)
    }

    /// A channel that never connects and drops every send. Used when the
    /// sync toggle is off.
    fn inert(config: SyncConfig) -> (Self, mpsc::UnboundedReceiver<EditorState>) {
        info!("Sync disabled, channel is inert");
        Self::build(config, None)
    }

    /// Serialize a state and write it to the active connection.
    ///
    /// Fire-and-forget: with no peer connected the record is dropped.
    pub fn send(&self, state: &EditorState) {
        let slot = self.inner.slot.lock();
        let PeerSlot::Active(handle) = &slot.peer else {
            debug!(
                action = %state.action,
                path = %state.file_path,
                "No active peer, dropping outbound state"
            );
            return;
        };

        match state.encode() {
            Ok(json) => {
                if handle.outbound.send(Message::Text(json.into())).is_err() {
                    debug!("Peer writer gone, dropping outbound state");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode outbound state"),
        }
    }

    /// Whether a peer connection is currently active.
    pub fn is_connected(&self) -> bool {
        matches!(self.inner.slot.lock().peer, PeerSlot::Active(_))
    }

    /// Watch connection status changes, e.g. for a host-side indicator.
    pub fn status(&self) -> watch::Receiver<bool> {
        self.inner.status_tx.subscribe()
    }

    /// The listener's bound address, if this side is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Tear the channel down: stop accepting/retrying, close the active
    /// connection, release the socket. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("Sync channel shutting down");
        self.inner.shutdown.cancel();
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Accept connections forever; each accepted WebSocket replaces the slot.
async fn accept_loop(listener: TcpListener, inner: Arc<ChannelInner>) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => {
                            info!(peer = %addr, "Peer connected");
                            tokio::spawn(run_connection(ws, inner.clone()));
                        }
                        Err(e) => warn!(peer = %addr, error = %e, "WebSocket handshake failed"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

/// Dial the peer until it answers; rerun the connection until shutdown.
async fn connect_loop(inner: Arc<ChannelInner>) {
    let url = format!("ws://{}", inner.config.addr());
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        match tokio_tungstenite::connect_async(url.clone()).await {
            Ok((ws, _response)) => {
                info!(%url, "Connected to peer");
                run_connection(ws, inner.clone()).await;
                if inner.shutdown.is_cancelled() {
                    break;
                }
                info!("Connection lost, will retry");
            }
            Err(e) => {
                debug!(%url, error = %e, "Connect attempt failed");
            }
        }

        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(inner.config.retry_interval) => {}
        }
    }
    debug!("Connect loop stopped");
}

/// Drive one established connection until it dies or is replaced.
///
/// Spawns the writer and heartbeat, runs the reader inline, and vacates
/// the slot on the way out (only if this connection still owns it).
async fn run_connection<S>(ws: WebSocketStream<S>, inner: Arc<ChannelInner>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let cancel = inner.shutdown.child_token();

    let generation = install_peer(&inner, outbound_tx.clone(), cancel.clone());
    inner.status_tx.send_replace(true);

    let missed_pongs = Arc::new(AtomicU32::new(0));
    let writer = tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
    let heartbeat = tokio::spawn(heartbeat_loop(
        outbound_tx.clone(),
        missed_pongs.clone(),
        cancel.clone(),
        inner.config.heartbeat_interval,
        inner.config.missed_pong_limit,
    ));

    read_loop(stream, &inner, &outbound_tx, &missed_pongs, &cancel).await;

    cancel.cancel();
    heartbeat.abort();
    let _ = writer.await;
    vacate_peer(&inner, generation);
}

/// Install a connection into the slot, cancelling whatever held it.
fn install_peer(
    inner: &ChannelInner,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
) -> u64 {
    let mut slot = inner.slot.lock();
    slot.next_generation += 1;
    let generation = slot.next_generation;

    if let PeerSlot::Active(previous) = std::mem::replace(
        &mut slot.peer,
        PeerSlot::Active(PeerHandle {
            generation,
            outbound,
            cancel,
        }),
    ) {
        debug!(replaced = previous.generation, "Replacing active peer connection");
        previous.cancel.cancel();
    }

    generation
}

/// Compare-and-vacate: a connection only clears the slot it still owns, so
/// a replaced connection's teardown cannot evict its successor.
fn vacate_peer(inner: &ChannelInner, generation: u64) {
    let mut slot = inner.slot.lock();
    if matches!(&slot.peer, PeerSlot::Active(handle) if handle.generation == generation) {
        slot.peer = PeerSlot::Vacant;
        inner.status_tx.send_replace(false);
        debug!(generation, "Peer slot vacated");
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = outbound_rx.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        debug!(error = %e, "Write failed, closing connection");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    inner: &ChannelInner,
    outbound_tx: &mpsc::UnboundedSender<Message>,
    missed_pongs: &AtomicU32,
    cancel: &CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    missed_pongs.store(0, Ordering::SeqCst);
                    match EditorState::decode(text.as_str()) {
                        Ok(state) => {
                            if inner.inbound_tx.send(state).is_err() {
                                debug!("Inbound receiver dropped, discarding state");
                            }
                        }
                        // Malformed payloads are logged and skipped; the
                        // connection stays open.
                        Err(e) => warn!(error = %e, "Dropping malformed inbound message"),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = outbound_tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Pong(_))) => {
                    missed_pongs.store(0, Ordering::SeqCst);
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Peer closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Read failed, closing connection");
                    break;
                }
                None => break,
            }
        }
    }
}

/// Ping on an interval; a peer that leaves too many pings unanswered is
/// treated as disconnected and the connection is torn down.
async fn heartbeat_loop(
    outbound_tx: mpsc::UnboundedSender<Message>,
    missed_pongs: Arc<AtomicU32>,
    cancel: CancellationToken,
    interval: std::time::Duration,
    limit: u32,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if missed_pongs.fetch_add(1, Ordering::SeqCst) >= limit {
                    warn!(limit, "Peer missed too many heartbeats, dropping connection");
                    cancel.cancel();
                    break;
                }
                if outbound_tx.send(Message::Ping(Vec::new().into())).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::EditorSource;

    fn disabled_config() -> SyncConfig {
        SyncConfig {
            enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_listener_is_inert() {
        let (channel, mut rx) = SyncChannel::listen(disabled_config()).await.unwrap();
        assert!(!channel.is_connected());
        assert!(channel.local_addr().is_none());

        // Sends are dropped without error.
        channel.send(&EditorState::open("/a.rs", 0, 0, EditorSource::Vscode, true));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_connector_never_dials() {
        let (channel, _rx) = SyncChannel::connect(disabled_config());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let config = SyncConfig {
            port: 0,
            ..Default::default()
        };
        let (channel, _rx) = SyncChannel::listen(config).await.unwrap();
        channel.shutdown();
        channel.shutdown();
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_listen_reports_bound_addr() {
        let config = SyncConfig {
            port: 0,
            ..Default::default()
        };
        let (channel, _rx) = SyncChannel::listen(config).await.unwrap();
        let addr = channel.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let config = SyncConfig {
            port: 0,
            ..Default::default()
        };
        let (first, _rx) = SyncChannel::listen(config).await.unwrap();
        let taken = first.local_addr().unwrap().port();

        let conflict = SyncConfig {
            port: taken,
            ..Default::default()
        };
        assert!(SyncChannel::listen(conflict).await.is_err());
        first.shutdown();
    }
}
