//! Shared, synchronized line state.
//!
//! `MonitoredLine` wraps the pure `LineStateMachine` in a mutex so poll
//! tasks and notification workers can update the same line concurrently.
//! Each accepted application publishes a `LineEvent` while the lock is
//! still held, so the event order always matches the order in which
//! updates were applied.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use linemon_core::{LineId, LineSnapshot, LineState, LineStateMachine, Presentation, Transition};
use linemon_protocol::Value;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::debug;

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    Poll,
    Notification,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Notification => f.write_str("notification"),
        }
    }
}

/// Published on every accepted value or error, never for ignored samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    pub line: LineId,
    pub previous: LineState,
    pub state: LineState,
    pub presentation: Presentation,
    pub source: UpdateSource,
    /// False when the application left state and presentation as they were
    pub changed: bool,
    pub at: DateTime<Utc>,
}

/// Shared handle to a monitored line.
pub type LineHandle = Arc<MonitoredLine>;

/// A line's state machine plus the channel its transitions go out on.
pub struct MonitoredLine {
    id: LineId,
    machine: Mutex<LineStateMachine>,
    events: broadcast::Sender<LineEvent>,
    /// Held for the duration of one poll tick, across reschedulings
    poll_slot: Arc<Mutex<()>>,
}

impl MonitoredLine {
    pub fn new(
        id: LineId,
        on: Presentation,
        off: Presentation,
        events: broadcast::Sender<LineEvent>,
    ) -> LineHandle {
        Arc::new(Self {
            id,
            machine: Mutex::new(LineStateMachine::new(on, off)),
            events,
            poll_slot: Arc::new(Mutex::new(())),
        })
    }

    pub fn id(&self) -> &LineId {
        &self.id
    }

    /// Claims the line's poll slot, or `None` while another tick holds it.
    pub fn try_begin_poll(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.poll_slot).try_lock_owned().ok()
    }

    /// Applies a sampled integer. Values other than 0 and 1 are ignored.
    pub async fn apply_value(&self, value: i64, source: UpdateSource) -> Option<LineEvent> {
        let mut machine = self.machine.lock().await;
        match machine.apply_value(value) {
            Some(transition) => Some(self.publish(transition, source)),
            None => {
                debug!(line = %self.id, value, %source, "Ignoring unrecognized value");
                None
            }
        }
    }

    /// Applies a protocol value. Missing or non-integer values are ignored.
    pub async fn apply_sample(&self, value: Option<&Value>, source: UpdateSource) -> Option<LineEvent> {
        match value.and_then(Value::as_integer) {
            Some(v) => self.apply_value(v, source).await,
            None => {
                debug!(line = %self.id, value = ?value, %source, "Ignoring non-integer sample");
                None
            }
        }
    }

    pub async fn apply_error(&self, source: UpdateSource) -> LineEvent {
        let mut machine = self.machine.lock().await;
        let transition = machine.apply_error();
        self.publish(transition, source)
    }

    pub async fn snapshot(&self) -> LineSnapshot {
        self.machine.lock().await.snapshot()
    }

    pub async fn state(&self) -> LineState {
        self.machine.lock().await.state()
    }

    pub async fn set_on_presentation(&self, presentation: Presentation) {
        self.machine.lock().await.set_on_presentation(presentation);
    }

    pub async fn set_off_presentation(&self, presentation: Presentation) {
        self.machine.lock().await.set_off_presentation(presentation);
    }

    /// Must be called with the machine lock held.
    fn publish(&self, transition: Transition, source: UpdateSource) -> LineEvent {
        let event = LineEvent {
            line: self.id.clone(),
            previous: transition.previous,
            state: transition.state,
            presentation: transition.presentation,
            source,
            changed: transition.changed,
            at: transition.at,
        };

        // No subscribers is fine
        let _ = self.events.send(event.clone());
        event
    }
}

impl fmt::Debug for MonitoredLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredLine").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linemon_core::{Color, DeviceId};

    fn line(events: broadcast::Sender<LineEvent>) -> LineHandle {
        MonitoredLine::new(
            LineId::new(DeviceId::new("dev"), "door"),
            Presentation::new("Open", Color::BLACK, Color::GREEN),
            Presentation::new("Closed", Color::BLACK, Color::RED),
            events,
        )
    }

    #[tokio::test]
    async fn test_accepted_values_publish_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let line = line(tx);

        let event = line.apply_value(1, UpdateSource::Poll).await.unwrap();
        assert_eq!(event.state, LineState::On);
        assert_eq!(event.presentation.text, "Open");

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_ignored_samples_publish_nothing() {
        let (tx, mut rx) = broadcast::channel(16);
        let line = line(tx);

        assert!(line.apply_value(7, UpdateSource::Poll).await.is_none());
        assert!(line.apply_sample(None, UpdateSource::Poll).await.is_none());
        assert!(line
            .apply_sample(Some(&Value::OctetString("1".into())), UpdateSource::Notification)
            .await
            .is_none());

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(line.state().await, LineState::Unknown);
    }

    #[tokio::test]
    async fn test_apply_sample_accepts_numeric_kinds() {
        let (tx, _rx) = broadcast::channel(16);
        let line = line(tx);

        let event = line
            .apply_sample(Some(&Value::Gauge(0)), UpdateSource::Notification)
            .await
            .unwrap();
        assert_eq!(event.state, LineState::Off);
        assert_eq!(event.source, UpdateSource::Notification);
    }

    #[tokio::test]
    async fn test_error_publishes() {
        let (tx, mut rx) = broadcast::channel(16);
        let line = line(tx);

        let event = line.apply_error(UpdateSource::Poll).await;
        assert_eq!(event.state, LineState::Error);
        assert_eq!(rx.recv().await.unwrap().presentation, Presentation::error());
    }

    #[tokio::test]
    async fn test_no_subscribers_is_fine() {
        let (tx, rx) = broadcast::channel(16);
        drop(rx);
        let line = line(tx);
        assert!(line.apply_value(0, UpdateSource::Poll).await.is_some());
    }
}
