//! The line monitor: devices, lines and their wiring.
//!
//! `LineMonitor` owns every configured line and keeps three things in step
//! for each of them:
//! - the shared [`MonitoredLine`] the poller and the listener both update
//! - the notification route in the [`LineRegistry`]
//! - the recurring poll in the [`PollScheduler`]
//!
//! A line is *active* (routed and polled) exactly when it has both a poll
//! identifier and a notify identifier. Every reconfiguration tears the line
//! down and re-activates it under the monitor lock, so no other monitor
//! operation observes a half-configured line.
//!
//! # Panic-Free Guarantees
//!
//! Poll settings are validated before they reach the scheduler, so a zero
//! interval can never be handed to the timer.

use std::collections::BTreeMap;
use std::sync::Arc;

use linemon_core::{DeviceId, DomainError, LineId, LineSnapshot, ObjectId, Presentation};
use linemon_protocol::ProtocolClient;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, LineConfig, PollSettings, Settings};
use crate::line::{LineEvent, LineHandle, MonitoredLine};
use crate::poll::PollTask;
use crate::registry::{LineRegistry, RegistryError};
use crate::scheduler::PollScheduler;

/// Transition events buffered per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

struct LineEntry {
    handle: LineHandle,
    poll_identifier: Option<ObjectId>,
    notify_identifier: Option<ObjectId>,
}

impl LineEntry {
    fn is_eligible(&self) -> bool {
        self.poll_identifier.is_some() && self.notify_identifier.is_some()
    }
}

struct DeviceEntry {
    config: DeviceConfig,
    lines: BTreeMap<String, LineEntry>,
}

struct MonitorState {
    devices: BTreeMap<DeviceId, DeviceEntry>,
    scheduler: PollScheduler,
}

/// Owns the monitored lines and applies configuration changes to them.
pub struct LineMonitor {
    registry: LineRegistry,
    client: Arc<dyn ProtocolClient>,
    settings: watch::Sender<PollSettings>,
    events: broadcast::Sender<LineEvent>,
    state: Mutex<MonitorState>,
}

impl LineMonitor {
    /// Creates an empty monitor.
    ///
    /// # Errors
    ///
    /// - `MonitorError::Config` if `poll` has a zero interval or timeout
    pub fn new(poll: PollSettings, client: Arc<dyn ProtocolClient>) -> Result<Self, MonitorError> {
        poll.validate()?;
        let (settings, _) = watch::channel(poll);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            registry: LineRegistry::new(),
            client,
            settings,
            events,
            state: Mutex::new(MonitorState {
                devices: BTreeMap::new(),
                scheduler: PollScheduler::new(),
            }),
        })
    }

    /// Applies a full settings file: poll settings, then every device and
    /// line in it.
    ///
    /// Problems are collected rather than aborting: a line with a bad
    /// identifier or a taken route is still added, stays `Unknown` and is
    /// not polled.
    pub async fn apply_settings(&self, settings: &Settings) -> Vec<MonitorError> {
        let mut problems = Vec::new();

        if let Err(e) = self.update_poll_settings(settings.poll.clone()).await {
            problems.push(e);
        }

        for device in &settings.devices {
            let config = DeviceConfig::from(device);
            let device_id = config.id.clone();
            if let Err(e) = self.add_device(config).await {
                problems.push(e);
                continue;
            }

            for line in &device.lines {
                let config = match line.to_config() {
                    Ok(config) => config,
                    Err(e) => {
                        let id = LineId::new(device_id.clone(), line.name.clone());
                        warn!(line = %id, error = %e, "Line has invalid settings, leaving it inactive");
                        problems.push(MonitorError::InvalidLine { line: id, source: e });
                        line.to_inert_config()
                    }
                };
                if let Err(e) = self.add_line(&device_id, config).await {
                    problems.push(e);
                }
            }
        }

        info!(
            devices = settings.devices.len(),
            problems = problems.len(),
            "Settings applied"
        );
        problems
    }

    // ========================================================================
    // Devices and lines
    // ========================================================================

    pub async fn add_device(&self, config: DeviceConfig) -> Result<(), MonitorError> {
        let mut state = self.state.lock().await;
        if state.devices.contains_key(&config.id) {
            return Err(MonitorError::DeviceExists(config.id));
        }

        info!(device = %config.id, address = %config.agent_address(), "Device added");
        state.devices.insert(
            config.id.clone(),
            DeviceEntry {
                config,
                lines: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Removes a device and deactivates all of its lines.
    pub async fn remove_device(&self, device: &DeviceId) -> Result<(), MonitorError> {
        let mut state = self.state.lock().await;
        let entry = state
            .devices
            .remove(device)
            .ok_or_else(|| MonitorError::UnknownDevice(device.clone()))?;

        for line in entry.lines.values() {
            self.deactivate(&mut state.scheduler, line.handle.id()).await;
        }
        info!(device = %device, lines = entry.lines.len(), "Device removed");
        Ok(())
    }

    /// Adds a line to a device and activates it if both identifiers are set.
    ///
    /// # Errors
    ///
    /// - `MonitorError::UnknownDevice` / `MonitorError::LineExists`: the
    ///   line is not added
    /// - `MonitorError::Registry`: the line is added but stays inactive
    pub async fn add_line(
        &self,
        device: &DeviceId,
        config: LineConfig,
    ) -> Result<LineId, MonitorError> {
        let mut state = self.state.lock().await;
        let MonitorState { devices, scheduler } = &mut *state;

        let DeviceEntry {
            config: device_config,
            lines,
        } = devices
            .get_mut(device)
            .ok_or_else(|| MonitorError::UnknownDevice(device.clone()))?;

        let id = LineId::new(device.clone(), config.name.clone());
        if lines.contains_key(&config.name) {
            return Err(MonitorError::LineExists(id));
        }

        let entry = LineEntry {
            handle: MonitoredLine::new(id.clone(), config.on, config.off, self.events.clone()),
            poll_identifier: config.poll_identifier,
            notify_identifier: config.notify_identifier,
        };
        let result = self.activate(scheduler, device_config, &entry).await;
        lines.insert(config.name, entry);

        info!(line = %id, "Line added");
        result.map(|_| id)
    }

    /// Removes a line, cancelling its poll and notification route.
    pub async fn remove_line(&self, line: &LineId) -> Result<(), MonitorError> {
        let mut state = self.state.lock().await;
        let MonitorState { devices, scheduler } = &mut *state;

        let removed = devices
            .get_mut(&line.device)
            .and_then(|device| device.lines.remove(&line.name))
            .ok_or_else(|| MonitorError::UnknownLine(line.clone()))?;

        self.deactivate(scheduler, removed.handle.id()).await;
        info!(line = %line, "Line removed");
        Ok(())
    }

    // ========================================================================
    // Line reconfiguration
    // ========================================================================

    pub async fn set_poll_identifier(
        &self,
        line: &LineId,
        identifier: Option<ObjectId>,
    ) -> Result<(), MonitorError> {
        self.reconfigure(line, |entry| entry.poll_identifier = identifier)
            .await
    }

    pub async fn set_notify_identifier(
        &self,
        line: &LineId,
        identifier: Option<ObjectId>,
    ) -> Result<(), MonitorError> {
        self.reconfigure(line, |entry| entry.notify_identifier = identifier)
            .await
    }

    /// Takes effect the next time the line accepts the value 1.
    pub async fn set_on_presentation(
        &self,
        line: &LineId,
        presentation: Presentation,
    ) -> Result<(), MonitorError> {
        let handle = self.require_line(line).await?;
        handle.set_on_presentation(presentation).await;
        Ok(())
    }

    /// Takes effect the next time the line accepts the value 0.
    pub async fn set_off_presentation(
        &self,
        line: &LineId,
        presentation: Presentation,
    ) -> Result<(), MonitorError> {
        let handle = self.require_line(line).await?;
        handle.set_off_presentation(presentation).await;
        Ok(())
    }

    /// Replaces the global poll settings.
    ///
    /// Retries, timeout, credential and version are read by every tick, so
    /// they apply from the next tick on. A changed interval reschedules
    /// every active line.
    pub async fn update_poll_settings(&self, poll: PollSettings) -> Result<(), MonitorError> {
        poll.validate()?;

        let mut state = self.state.lock().await;
        let interval = poll.interval();
        let previous = self.settings.send_replace(poll);
        if previous.interval() == interval {
            debug!("Poll settings updated");
            return Ok(());
        }

        let MonitorState { devices, scheduler } = &mut *state;
        let mut rescheduled = 0;
        for device in devices.values() {
            for entry in device.lines.values() {
                if scheduler.handle(entry.handle.id()).is_none() {
                    continue;
                }
                if let Some(task) = self.poll_task(&device.config, entry) {
                    scheduler.schedule(task, interval);
                    rescheduled += 1;
                }
            }
        }

        info!(
            interval_ms = interval.as_millis() as u64,
            rescheduled, "Poll interval changed"
        );
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn poll_settings(&self) -> PollSettings {
        self.settings.borrow().clone()
    }

    pub async fn line_snapshot(&self, line: &LineId) -> Result<LineSnapshot, MonitorError> {
        let handle = self.require_line(line).await?;
        Ok(handle.snapshot().await)
    }

    /// Shared handle to a line, for callers that want to observe it directly.
    pub async fn line(&self, line: &LineId) -> Option<LineHandle> {
        let state = self.state.lock().await;
        state
            .devices
            .get(&line.device)
            .and_then(|device| device.lines.get(&line.name))
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// All line ids, ordered by device then line name.
    pub async fn lines(&self) -> Vec<LineId> {
        let state = self.state.lock().await;
        state
            .devices
            .values()
            .flat_map(|device| device.lines.values())
            .map(|entry| entry.handle.id().clone())
            .collect()
    }

    pub async fn devices(&self) -> Vec<DeviceConfig> {
        let state = self.state.lock().await;
        state
            .devices
            .values()
            .map(|device| device.config.clone())
            .collect()
    }

    /// Whether `line` currently has a running poll schedule.
    pub async fn is_scheduled(&self, line: &LineId) -> bool {
        self.state.lock().await.scheduler.is_scheduled(line)
    }

    /// Receives an event for every accepted value or error on any line.
    pub fn subscribe(&self) -> broadcast::Receiver<LineEvent> {
        self.events.subscribe()
    }

    /// The registry to hand to the notification listener.
    pub fn registry(&self) -> LineRegistry {
        self.registry.clone()
    }

    /// Stops every poll. In-flight ticks finish; routes stay registered.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.scheduler.cancel_all();
        info!("Line monitor stopped");
    }

    // ========================================================================
    // Activation
    // ========================================================================

    async fn require_line(&self, line: &LineId) -> Result<LineHandle, MonitorError> {
        self.line(line)
            .await
            .ok_or_else(|| MonitorError::UnknownLine(line.clone()))
    }

    /// Applies `change` to a line's identifiers and re-activates it.
    async fn reconfigure<F>(&self, line: &LineId, change: F) -> Result<(), MonitorError>
    where
        F: FnOnce(&mut LineEntry),
    {
        let mut state = self.state.lock().await;
        let MonitorState { devices, scheduler } = &mut *state;

        let DeviceEntry { config, lines } = devices
            .get_mut(&line.device)
            .ok_or_else(|| MonitorError::UnknownLine(line.clone()))?;
        let entry = lines
            .get_mut(&line.name)
            .ok_or_else(|| MonitorError::UnknownLine(line.clone()))?;

        self.deactivate(scheduler, line).await;
        change(entry);
        let active = self.activate(scheduler, config, entry).await?;
        debug!(line = %line, active, "Line reconfigured");
        Ok(())
    }

    /// Routes and schedules `entry` if it is eligible. Returns whether it
    /// was activated.
    async fn activate(
        &self,
        scheduler: &mut PollScheduler,
        device: &DeviceConfig,
        entry: &LineEntry,
    ) -> Result<bool, MonitorError> {
        let (Some(notify), Some(task)) = (&entry.notify_identifier, self.poll_task(device, entry))
        else {
            debug!(line = %entry.handle.id(), "Line lacks an identifier, not polling");
            return Ok(false);
        };

        if let Err(e) = self
            .registry
            .register(device.address, notify.clone(), Arc::clone(&entry.handle))
            .await
        {
            warn!(line = %entry.handle.id(), error = %e, "Line left inactive");
            return Err(e.into());
        }

        let interval = self.settings.borrow().interval();
        scheduler.schedule(task, interval);
        Ok(true)
    }

    async fn deactivate(&self, scheduler: &mut PollScheduler, line: &LineId) {
        scheduler.cancel_line(line);
        self.registry.unregister(line).await;
    }

    fn poll_task(&self, device: &DeviceConfig, entry: &LineEntry) -> Option<PollTask> {
        if !entry.is_eligible() {
            return None;
        }
        let identifier = entry.poll_identifier.clone()?;
        Some(PollTask::new(
            Arc::clone(&entry.handle),
            identifier,
            device.agent_address(),
            device.credential.clone(),
            self.settings.subscribe(),
            Arc::clone(&self.client),
        ))
    }
}

/// Errors that can occur in monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("unknown line: {0}")]
    UnknownLine(LineId),

    #[error("device already exists: {0}")]
    DeviceExists(DeviceId),

    #[error("line already exists: {0}")]
    LineExists(LineId),

    #[error("invalid settings for line {line}: {source}")]
    InvalidLine { line: LineId, source: DomainError },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid settings: {0}")]
    Config(#[from] DomainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use linemon_core::LineState;
    use linemon_protocol::{GetResponse, PollTarget, ProtocolError, Value};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    const DOOR: &str = "1.3.6.1.4.1.25728.8900.1.1.2.1";
    const DOOR_TRAP: &str = "1.3.6.1.4.1.25728.8900.2.2.1";

    struct ConstClient {
        value: AtomicI64,
        calls: AtomicUsize,
    }

    impl ConstClient {
        fn new(value: i64) -> Arc<Self> {
            Arc::new(Self {
                value: AtomicI64::new(value),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProtocolClient for ConstClient {
        async fn get(
            &self,
            _target: &PollTarget,
            _oid: &ObjectId,
        ) -> Result<GetResponse, ProtocolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GetResponse::ok(Value::Integer(self.value.load(Ordering::SeqCst))))
        }
    }

    /// Answers 1 after `delay`, recording the peak number of concurrent requests.
    struct SlowClient {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ProtocolClient for SlowClient {
        async fn get(
            &self,
            _target: &PollTarget,
            _oid: &ObjectId,
        ) -> Result<GetResponse, ProtocolError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GetResponse::ok(Value::Integer(1)))
        }
    }

    fn oid(s: &str) -> ObjectId {
        ObjectId::parse(s).unwrap()
    }

    fn gate_address() -> IpAddr {
        "192.168.1.214".parse().unwrap()
    }

    fn poll(interval_ms: u64) -> PollSettings {
        PollSettings {
            poll_interval_ms: interval_ms,
            ..PollSettings::default()
        }
    }

    async fn monitor_with_gate(client: Arc<ConstClient>) -> (LineMonitor, DeviceId) {
        let monitor = LineMonitor::new(poll(100), client).unwrap();
        monitor
            .add_device(DeviceConfig::new("gate", gate_address()))
            .await
            .unwrap();
        (monitor, DeviceId::new("gate"))
    }

    #[test]
    fn test_new_rejects_zero_interval() {
        let result = LineMonitor::new(poll(0), ConstClient::new(1));
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eligible_line_is_routed_and_polled() {
        let client = ConstClient::new(1);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;

        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();

        assert!(monitor.is_scheduled(&id).await);
        let routed = monitor.registry().lookup(gate_address(), &oid(DOOR_TRAP)).await;
        assert_eq!(routed.map(|l| l.id().clone()), Some(id.clone()));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.line_snapshot(&id).await.unwrap().state, LineState::On);
        assert!(client.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_missing_identifier_is_never_touched() {
        let client = ConstClient::new(1);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;
        let mut events = monitor.subscribe();

        let mut config = LineConfig::new("door");
        config.poll_identifier = Some(oid(DOOR));
        let id = monitor.add_line(&gate, config).await.unwrap();

        sleep(Duration::from_secs(1)).await;
        assert!(!monitor.is_scheduled(&id).await);
        assert!(monitor.registry().is_empty().await);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.line_snapshot(&id).await.unwrap().state, LineState::Unknown);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setting_identifiers_activates_and_clearing_deactivates() {
        let client = ConstClient::new(0);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;
        let id = monitor.add_line(&gate, LineConfig::new("door")).await.unwrap();

        monitor.set_poll_identifier(&id, Some(oid(DOOR))).await.unwrap();
        assert!(!monitor.is_scheduled(&id).await);

        monitor
            .set_notify_identifier(&id, Some(oid(DOOR_TRAP)))
            .await
            .unwrap();
        assert!(monitor.is_scheduled(&id).await);
        assert_eq!(monitor.registry().len().await, 1);

        monitor.set_notify_identifier(&id, None).await.unwrap();
        assert!(!monitor.is_scheduled(&id).await);
        assert!(monitor.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changing_notify_identifier_moves_route() {
        let (monitor, gate) = monitor_with_gate(ConstClient::new(1)).await;
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR)))
            .await
            .unwrap();

        monitor
            .set_notify_identifier(&id, Some(oid(DOOR_TRAP)))
            .await
            .unwrap();

        let registry = monitor.registry();
        assert!(registry.lookup(gate_address(), &oid(DOOR)).await.is_none());
        assert!(registry.lookup(gate_address(), &oid(DOOR_TRAP)).await.is_some());
        assert_eq!(registry.len().await, 1);
        assert!(monitor.is_scheduled(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_devices_and_lines_rejected() {
        let (monitor, gate) = monitor_with_gate(ConstClient::new(1)).await;

        let result = monitor
            .add_device(DeviceConfig::new("gate", gate_address()))
            .await;
        assert!(matches!(result, Err(MonitorError::DeviceExists(_))));

        monitor.add_line(&gate, LineConfig::new("door")).await.unwrap();
        let result = monitor.add_line(&gate, LineConfig::new("door")).await;
        assert!(matches!(result, Err(MonitorError::LineExists(_))));

        let result = monitor
            .add_line(&DeviceId::new("missing"), LineConfig::new("door"))
            .await;
        assert!(matches!(result, Err(MonitorError::UnknownDevice(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_taken_route_leaves_second_line_inactive() {
        let (monitor, gate) = monitor_with_gate(ConstClient::new(1)).await;
        let first = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();

        let result = monitor
            .add_line(&gate, LineConfig::new("alias").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await;
        assert!(matches!(result, Err(MonitorError::Registry(_))));

        let alias = LineId::new(gate.clone(), "alias");
        assert!(monitor.lines().await.contains(&alias));
        assert!(!monitor.is_scheduled(&alias).await);
        assert!(monitor.is_scheduled(&first).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_device_tears_down_lines() {
        let (monitor, gate) = monitor_with_gate(ConstClient::new(1)).await;
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();

        monitor.remove_device(&gate).await.unwrap();

        assert!(!monitor.is_scheduled(&id).await);
        assert!(monitor.registry().is_empty().await);
        assert!(monitor.lines().await.is_empty());
        assert!(matches!(
            monitor.line_snapshot(&id).await,
            Err(MonitorError::UnknownLine(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_line_stops_polling() {
        let client = ConstClient::new(1);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();
        sleep(Duration::from_millis(250)).await;

        monitor.remove_line(&id).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        let calls = client.calls.load(Ordering::SeqCst);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), calls);
        assert!(monitor.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_reschedules_active_lines() {
        let client = ConstClient::new(1);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();
        let inactive = monitor.add_line(&gate, LineConfig::new("spare")).await.unwrap();

        monitor.update_poll_settings(poll(500)).await.unwrap();
        assert_eq!(monitor.poll_settings().poll_interval_ms, 500);
        assert!(monitor.is_scheduled(&id).await);
        assert!(!monitor.is_scheduled(&inactive).await);

        sleep(Duration::from_millis(10)).await;
        let before = client.calls.load(Ordering::SeqCst);
        sleep(Duration::from_millis(1000)).await;
        let polled = client.calls.load(Ordering::SeqCst) - before;
        assert!((1..=3).contains(&polled), "polled {polled} times in 1s at 500ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_mid_tick_keeps_one_request_per_line() {
        let client = Arc::new(SlowClient {
            delay: Duration::from_millis(500),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let monitor = LineMonitor::new(poll(1000), client.clone()).unwrap();
        monitor
            .add_device(DeviceConfig::new("gate", gate_address()))
            .await
            .unwrap();
        let gate = DeviceId::new("gate");
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        monitor.update_poll_settings(poll(2000)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(client.peak.load(Ordering::SeqCst), 1);

        // Same after the identifier is reconfigured mid-tick
        sleep(Duration::from_millis(2000)).await;
        monitor.set_poll_identifier(&id, Some(oid(DOOR))).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(client.peak.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.line_snapshot(&id).await.unwrap().state, LineState::On);
    }

    #[tokio::test]
    async fn test_update_poll_settings_rejects_zero_timeout() {
        let monitor = LineMonitor::new(poll(100), ConstClient::new(1)).unwrap();
        let bad = PollSettings {
            timeout_ms: 0,
            ..PollSettings::default()
        };
        assert!(matches!(
            monitor.update_poll_settings(bad).await,
            Err(MonitorError::Config(_))
        ));
        assert_eq!(monitor.poll_settings().poll_interval_ms, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presentation_change_applies_on_next_value() {
        let client = ConstClient::new(1);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.line_snapshot(&id).await.unwrap().presentation.text, "On");

        let open = Presentation::new("Open", linemon_core::Color::BLACK, linemon_core::Color::GREEN);
        monitor.set_on_presentation(&id, open).await.unwrap();
        // Not repainted until the next accepted value
        assert_eq!(monitor.line_snapshot(&id).await.unwrap().presentation.text, "On");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.line_snapshot(&id).await.unwrap().presentation.text, "Open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_settings_reports_bad_line_and_keeps_going() {
        let text = r##"
poll_interval_ms = 200

[[devices]]
name = "gate"
address = "192.168.1.214"

[[devices.lines]]
name = "door"
poll_identifier = "1.3.6.1.4.1.25728.8900.1.1.2.1"
notify_identifier = "1.3.6.1.4.1.25728.8900.2.2.1"

[[devices.lines]]
name = "broken"
poll_identifier = "not.an.identifier"
notify_identifier = "1.3.6.1.4.1.25728.8900.2.2.2"
"##;
        let settings = Settings::from_toml(text).unwrap();
        let monitor = LineMonitor::new(PollSettings::default(), ConstClient::new(0)).unwrap();

        let problems = monitor.apply_settings(&settings).await;
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], MonitorError::InvalidLine { .. }));

        let gate = DeviceId::new("gate");
        let door = LineId::new(gate.clone(), "door");
        let broken = LineId::new(gate, "broken");
        assert_eq!(monitor.lines().await, vec![broken.clone(), door.clone()]);
        assert!(monitor.is_scheduled(&door).await);
        assert!(!monitor.is_scheduled(&broken).await);
        assert_eq!(monitor.poll_settings().poll_interval_ms, 200);
        assert_eq!(monitor.devices().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_polls() {
        let client = ConstClient::new(1);
        let (monitor, gate) = monitor_with_gate(client.clone()).await;
        let id = monitor
            .add_line(&gate, LineConfig::new("door").with_identifiers(oid(DOOR), oid(DOOR_TRAP)))
            .await
            .unwrap();

        monitor.shutdown().await;
        sleep(Duration::from_millis(10)).await;
        let calls = client.calls.load(Ordering::SeqCst);
        sleep(Duration::from_secs(1)).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), calls);
        assert!(!monitor.is_scheduled(&id).await);
    }
}
