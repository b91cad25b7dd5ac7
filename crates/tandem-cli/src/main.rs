//! Headless Tandem endpoint.
//!
//! Runs one side of the sync pair with a scripted editor host: it opens a
//! fake file, walks its caret to generate outbound traffic, and logs every
//! state the peer applies. Useful for exercising the channel and
//! coordinator end to end without either editor installed:
//!
//! ```text
//! tandem --source jetbrains listen
//! tandem --source vscode connect
//! ```

mod scripted;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use scripted::ScriptedHost;
use std::sync::Arc;
use std::time::Duration;
use tandem_channel::{SyncChannel, SyncConfig};
use tandem_core::StateCoordinator;
use tandem_protocol::EditorSource;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem", version, about = "Headless editor-sync endpoint")]
struct Cli {
    /// Port the listener binds and the connector dials
    #[arg(long, default_value_t = tandem_channel::config::DEFAULT_PORT)]
    port: u16,

    /// Host the connector dials
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Which editor side this endpoint impersonates
    #[arg(long, value_enum, default_value_t = Side::Jetbrains)]
    source: Side,

    /// Fake file this endpoint pretends to have open
    #[arg(long, default_value = "/tmp/tandem-demo.rs")]
    file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bind the port and wait for the peer to connect
    Listen,
    /// Dial the peer, retrying until it appears
    Connect,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Jetbrains,
    Vscode,
}

impl From<Side> for EditorSource {
    fn from(side: Side) -> Self {
        match side {
            Side::Jetbrains => Self::Jetbrains,
            Side::Vscode => Self::Vscode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig {
        port: cli.port,
        host: cli.host.clone(),
        ..Default::default()
    };

    let (channel, mut inbound_rx) = match cli.command {
        Command::Listen => SyncChannel::listen(config).await?,
        Command::Connect => SyncChannel::connect(config),
    };

    let host = Arc::new(ScriptedHost::new(cli.file, 200));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let coordinator = Arc::new(StateCoordinator::new(
        cli.source.into(),
        host.clone(),
        outbound_tx,
    ));

    // Outbound pump: coordinator -> channel.
    let sender = channel.clone();
    tokio::spawn(async move {
        while let Some(state) = outbound_rx.recv().await {
            sender.send(&state);
        }
    });

    // Inbound pump: channel -> coordinator.
    let applier = coordinator.clone();
    tokio::spawn(async move {
        while let Some(state) = inbound_rx.recv().await {
            info!(
                action = %state.action,
                path = %state.file_path,
                line = state.line,
                "Received peer state"
            );
            applier.apply_remote(&state);
        }
    });

    // Status indicator.
    let mut status = channel.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            if *status.borrow() {
                info!("Peer connected");
            } else {
                warn!("Peer disconnected");
            }
        }
    });

    // Script: open the fake file, then wander the caret to generate
    // debounced NAVIGATE traffic.
    coordinator.file_opened();
    let walker = coordinator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            host.step_caret();
            walker.selection_changed();
        }
    });

    info!(source = %coordinator.source(), "Endpoint running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    coordinator.dispose();
    channel.shutdown();
    Ok(())
}
