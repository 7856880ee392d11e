//! Recurring poll scheduling, one task per line.
//!
//! Each scheduled line gets its own tokio task driving an interval. A tick
//! runs to completion before the next one is awaited and missed ticks are
//! skipped, so slow devices never build a backlog. Every tick also claims
//! the line's poll slot; a tick left over from a previous scheduling keeps
//! the slot until it finishes, and the new schedule skips its ticks until
//! then. At most one poll per line is ever in flight. Lines do not share a worker, so one line waiting
//! on a timeout never delays another.
//!
//! # Panic-Free Guarantees
//!
//! A tick runs in its own spawned task; if it panics the line is put into
//! `Error` and the schedule keeps going.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use linemon_core::LineId;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::line::UpdateSource;
use crate::poll::PollTask;

/// Identifies one scheduling of one line.
///
/// Rescheduling a line produces a new handle; cancelling a stale handle
/// does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    line: LineId,
    generation: u64,
    interval: Duration,
}

impl PollHandle {
    pub fn line(&self) -> &LineId {
        &self.line
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

struct Scheduled {
    handle: PollHandle,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the recurring poll task of every scheduled line.
pub struct PollScheduler {
    tasks: HashMap<LineId, Scheduled>,
    next_generation: u64,
    shutdown: CancellationToken,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_generation: 0,
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts polling `task`'s line every `every`.
    ///
    /// Any schedule the line already had is cancelled first, so a line
    /// never has two active schedules.
    pub fn schedule(&mut self, task: PollTask, every: Duration) -> PollHandle {
        let line = task.line().id().clone();
        self.cancel_line(&line);

        self.next_generation += 1;
        let handle = PollHandle {
            line: line.clone(),
            generation: self.next_generation,
            interval: every,
        };
        let cancel = self.shutdown.child_token();
        let join = tokio::spawn(run_schedule(Arc::new(task), every, cancel.clone()));

        info!(line = %line, interval_ms = every.as_millis() as u64, "Poll scheduled");
        self.tasks.insert(
            line,
            Scheduled {
                handle: handle.clone(),
                cancel,
                join,
            },
        );
        handle
    }

    /// Cancels the schedule identified by `handle`, if it is still current.
    ///
    /// A tick already in flight finishes; no new ticks start.
    pub fn cancel(&mut self, handle: &PollHandle) -> bool {
        let current = self
            .tasks
            .get(&handle.line)
            .is_some_and(|s| s.handle.generation == handle.generation);
        if current {
            self.cancel_line(&handle.line)
        } else {
            false
        }
    }

    /// Cancels whatever schedule `line` has.
    pub fn cancel_line(&mut self, line: &LineId) -> bool {
        match self.tasks.remove(line) {
            Some(scheduled) => {
                scheduled.cancel.cancel();
                debug!(line = %line, "Poll cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every schedule.
    pub fn cancel_all(&mut self) {
        self.shutdown.cancel();
        let count = self.tasks.len();
        self.tasks.clear();
        // Fresh token so the scheduler stays usable
        self.shutdown = CancellationToken::new();
        info!(count, "All polls cancelled");
    }

    pub fn handle(&self, line: &LineId) -> Option<&PollHandle> {
        self.tasks.get(line).map(|s| &s.handle)
    }

    pub fn is_scheduled(&self, line: &LineId) -> bool {
        self.tasks.get(line).is_some_and(|s| !s.join.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Drives one line's interval until cancelled.
async fn run_schedule(task: Arc<PollTask>, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {}
        }

        let Some(slot) = task.line().try_begin_poll() else {
            debug!(line = %task.line().id(), "Previous tick still in flight, skipping");
            continue;
        };

        let tick = tokio::spawn({
            let task = Arc::clone(&task);
            async move {
                let _slot = slot;
                task.run_once().await
            }
        });

        match tick.await {
            Ok(outcome) => {
                trace!(line = %task.line().id(), outcome = ?outcome, "Tick finished");
            }
            Err(e) => {
                error!(line = %task.line().id(), error = %e, "Poll tick aborted");
                task.line().apply_error(UpdateSource::Poll).await;
            }
        }
    }

    debug!(line = %task.line().id(), "Poll schedule stopped");
}
