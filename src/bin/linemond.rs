//! linemon daemon - polls and listens for IO line state on remote devices
//!
//! Runs in the foreground until SIGTERM/SIGINT. Every line transition is
//! written to the log.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default settings file (<config_dir>/linemon/config.toml)
//! linemond
//!
//! # Run with an explicit settings file
//! linemond --config /etc/linemon/config.toml
//!
//! # Listen for notifications on an unprivileged port
//! linemond --listen 0.0.0.0:1162
//!
//! # Enable debug logging
//! RUST_LOG=linemond=debug linemond
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use linemon_protocol::{ProtocolClient, UdpClient};
use linemond::{LineEvent, LineMonitor, NotificationListener, Settings};

/// linemon daemon - IO line monitor
#[derive(Parser, Debug)]
#[command(name = "linemond", version, about)]
struct Args {
    /// Settings file (defaults to <config_dir>/linemon/config.toml)
    #[arg(short, long, env = "LINEMON_CONFIG")]
    config: Option<PathBuf>,

    /// Address to receive notifications on, overriding the settings file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("linemond=info".parse()?)
                .add_directive("linemon_core=info".parse()?)
                .add_directive("linemon_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "linemon daemon starting"
    );

    let mut settings = load_settings(args.config)?;
    if let Some(listen) = args.listen {
        settings.listen_address = listen;
    }

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let client: Arc<dyn ProtocolClient> = Arc::new(UdpClient::new());
    let monitor = LineMonitor::new(settings.poll.clone(), client)
        .context("Invalid poll settings")?;

    let adapter = tokio::spawn(log_transitions(monitor.subscribe(), cancel_token.clone()));

    for problem in monitor.apply_settings(&settings).await {
        warn!(error = %problem, "Configuration problem");
    }

    // A bind failure stops the listener only; polling keeps running
    let listener = NotificationListener::new(monitor.registry(), cancel_token.clone());
    let listen_address = settings.listen_address;
    let listener_task = tokio::spawn(async move {
        if let Err(e) = listener.listen(listen_address).await {
            error!(
                address = %listen_address,
                error = %e,
                "Notification listener unavailable, continuing with polling only"
            );
        }
    });

    cancel_token.cancelled().await;

    monitor.shutdown().await;
    if let Err(e) = listener_task.await {
        error!(error = %e, "Listener task failed");
    }
    if let Err(e) = adapter.await {
        error!(error = %e, "Transition logger failed");
    }

    info!("linemon daemon stopped");
    Ok(())
}

/// Loads settings from `path`, or from the default location when absent.
fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    match path.or_else(Settings::default_path) {
        Some(path) => {
            info!(path = %path.display(), "Loading settings");
            Settings::load_or_default(&path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => {
            warn!("No configuration directory, using default settings");
            Ok(Settings::default())
        }
    }
}

/// Presentation adapter: writes every accepted transition to the log.
async fn log_transitions(mut events: broadcast::Receiver<LineEvent>, cancel_token: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,

            result = events.recv() => match result {
                Ok(event) if event.changed => {
                    info!(
                        line = %event.line,
                        from = %event.previous,
                        to = %event.state,
                        text = %event.presentation.text,
                        foreground = %event.presentation.foreground,
                        background = %event.presentation.background,
                        source = %event.source,
                        "Line changed"
                    );
                }
                Ok(event) => {
                    debug!(line = %event.line, state = %event.state, source = %event.source, "Line confirmed");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Transition logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
