//! One poll of one line.
//!
//! A `PollTask` owns everything a tick needs: the line, the identifier to
//! request, the device address and a view of the live poll settings. The
//! request target is rebuilt from the settings on every tick, so changed
//! retries, timeouts or credentials apply from the next tick on.

use std::net::SocketAddr;
use std::sync::Arc;

use linemon_core::{LineState, ObjectId};
use linemon_protocol::{PollTarget, ProtocolClient, ProtocolError};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::PollSettings;
use crate::line::{LineHandle, UpdateSource};

/// What one executed tick did to its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A 0 or 1 was applied
    Applied(LineState),
    /// The answer carried no recognizable value; the line was not touched
    Ignored,
    /// No usable answer; the line went to `Error`
    Failed(TickFailure),
}

/// Why a tick drove its line to `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickFailure {
    Protocol(ProtocolError),
    ErrorStatus { status: u32, index: u32 },
}

/// Per-line poll job.
pub struct PollTask {
    line: LineHandle,
    identifier: ObjectId,
    agent: SocketAddr,
    credential: Option<String>,
    settings: watch::Receiver<PollSettings>,
    client: Arc<dyn ProtocolClient>,
}

impl PollTask {
    pub fn new(
        line: LineHandle,
        identifier: ObjectId,
        agent: SocketAddr,
        credential: Option<String>,
        settings: watch::Receiver<PollSettings>,
        client: Arc<dyn ProtocolClient>,
    ) -> Self {
        Self {
            line,
            identifier,
            agent,
            credential,
            settings,
            client,
        }
    }

    pub fn line(&self) -> &LineHandle {
        &self.line
    }

    /// Snapshot of the request parameters as of now.
    pub fn target(&self) -> PollTarget {
        let settings = self.settings.borrow();
        PollTarget {
            address: self.agent,
            credential: self
                .credential
                .clone()
                .unwrap_or_else(|| settings.credential.clone()),
            version: settings.version,
            retries: settings.retries,
            timeout: settings.timeout(),
        }
    }

    /// Runs one tick. Makes at most one state-mutating call on the line.
    pub async fn run_once(&self) -> TickOutcome {
        let target = self.target();
        let max_wait = target.max_wait();

        let result = match timeout(max_wait, self.client.get(&target, &self.identifier)).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(max_wait)),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    line = %self.line.id(),
                    target = %target.address,
                    error = %e,
                    "Poll failed"
                );
                self.line.apply_error(UpdateSource::Poll).await;
                return TickOutcome::Failed(TickFailure::Protocol(e));
            }
        };

        if response.is_error() {
            warn!(
                line = %self.line.id(),
                target = %target.address,
                error_status = response.error_status,
                error_index = response.error_index,
                "Poll returned error status"
            );
            self.line.apply_error(UpdateSource::Poll).await;
            return TickOutcome::Failed(TickFailure::ErrorStatus {
                status: response.error_status,
                index: response.error_index,
            });
        }

        match self
            .line
            .apply_sample(response.value.as_ref(), UpdateSource::Poll)
            .await
        {
            Some(event) => {
                debug!(line = %self.line.id(), state = %event.state, "Poll applied");
                TickOutcome::Applied(event.state)
            }
            None => TickOutcome::Ignored,
        }
    }
}
