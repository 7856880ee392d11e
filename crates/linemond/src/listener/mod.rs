//! Notification listener for the line monitor.
//!
//! The listener:
//! - Receives messages from an [`InboundTransport`]
//! - Hands each one to a dispatch worker (bounded pool)
//! - Routes notifications to lines through the [`LineRegistry`]
//! - Acknowledges requests without touching any line
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ NotificationListener │
//! │                      │
//! │  InboundTransport    │
//! └──────────┬───────────┘
//!            │ recv()
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │   dispatch worker    │────▶│   LineRegistry   │
//! │ (≤ workers in flight)│     │ (device, oid)    │
//! └──────────┬───────────┘     └────────┬─────────┘
//!            │ reply (requests/informs) │ apply_sample
//!            ▼                          ▼
//!        sender                  MonitoredLine
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` outside tests
//! - A bad datagram or failed reply is logged and the loop continues
//! - Only a fatal transport error ends `serve` early

mod dispatch;

pub use dispatch::{dispatch, DispatchOutcome};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use linemon_protocol::{InboundTransport, TransportError, UdpTransport};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::registry::LineRegistry;

/// Messages handled concurrently before the receive loop waits.
pub const DEFAULT_DISPATCH_WORKERS: usize = 10;

/// Pause after a socket error before receiving again.
const IO_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Receives inbound messages and dispatches them to lines.
pub struct NotificationListener {
    registry: LineRegistry,
    cancel_token: CancellationToken,
    workers: usize,
}

impl NotificationListener {
    pub fn new(registry: LineRegistry, cancel_token: CancellationToken) -> Self {
        Self {
            registry,
            cancel_token,
            workers: DEFAULT_DISPATCH_WORKERS,
        }
    }

    /// Overrides the dispatch pool size. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Binds a UDP transport on `addr` and serves it until cancelled.
    ///
    /// # Errors
    ///
    /// - `ListenerError::Transport` if the address cannot be bound or
    ///   the socket fails fatally
    pub async fn listen(&self, addr: SocketAddr) -> Result<(), ListenerError> {
        let transport = UdpTransport::bind(addr).await?;
        match transport.local_addr() {
            Ok(local) => info!(address = %local, "Notification listener bound"),
            Err(e) => warn!(error = %e, "Could not read listener address"),
        }
        self.serve(transport).await
    }

    /// Serves `transport` until the cancellation token fires.
    ///
    /// In-flight dispatches are allowed to finish before this returns.
    pub async fn serve<T: InboundTransport>(&self, mut transport: T) -> Result<(), ListenerError> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let tracker = TaskTracker::new();
        let mut result = Ok(());

        loop {
            let received = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Listener received shutdown signal");
                    break;
                }

                received = transport.recv() => received,
            };

            let msg = match received {
                Ok(msg) => msg,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Listener transport failed");
                    result = Err(ListenerError::Transport(e));
                    break;
                }
                Err(e @ TransportError::Io(_)) => {
                    warn!(error = %e, backoff_ms = IO_ERROR_BACKOFF.as_millis() as u64, "Socket error");
                    tokio::select! {
                        biased;

                        _ = self.cancel_token.cancelled() => {
                            info!("Listener received shutdown signal");
                            break;
                        }

                        _ = tokio::time::sleep(IO_ERROR_BACKOFF) => continue,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dropping inbound message");
                    continue;
                }
            };

            // Wait for a free worker; the socket buffers meanwhile
            let permit = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Listener received shutdown signal");
                    break;
                }

                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            debug!(source = %msg.source, kind = ?msg.kind, "Dispatching message");
            let registry = self.registry.clone();
            tracker.spawn(async move {
                let _permit = permit;
                let outcome = dispatch(&registry, msg).await;
                debug!(?outcome, "Dispatch complete");
            });
        }

        drop(transport);
        tracker.close();
        tracker.wait().await;
        info!("Notification listener stopped");
        result
    }
}

/// Errors that end the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener transport error: {0}")]
    Transport(#[from] TransportError),
}
