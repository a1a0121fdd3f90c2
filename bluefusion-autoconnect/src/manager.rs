use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use bluefusion_types::Address;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConnectionConfig, Priority};
use crate::events::{Event, EventKind};
use crate::managed::ManagedConnection;
use crate::persistence;
use crate::state::ConnectionState;
use crate::target::{with_timeout, ManagedTarget, TargetError};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const STATE_SAVE_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);
const HEALTH_PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Per-device health classification produced by the analytics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthClass {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct DeviceHealth {
    pub address: Address,
    pub score: f64,
    pub class: HealthClass,
    pub recommendations: Vec<String>,
}

/// Per-device health score in `[0, 100]`: 40% success rate, 20% connect-time
/// penalty, 20% consecutive-failure penalty, 20% uptime bonus.
fn health_score(conn: &ManagedConnection) -> DeviceHealth {
    let success_rate = conn.metrics.stability_score();
    let success_component = success_rate * 40.0;

    let connect_time = conn.metrics.average_connection_time.as_secs_f64();
    let connect_penalty_fraction = (connect_time / conn.config.connection_timeout.as_secs_f64().max(1.0)).min(1.0);
    let connect_component = (1.0 - connect_penalty_fraction) * 20.0;

    let failure_fraction =
        (conn.metrics.consecutive_failures as f64 / conn.config.max_consecutive_failures.max(1) as f64).min(1.0);
    let failure_component = (1.0 - failure_fraction) * 20.0;

    let uptime_fraction = if conn.state == ConnectionState::Connected {
        (conn.metrics.uptime.as_secs_f64() / 3600.0).min(1.0)
    } else {
        0.0
    };
    let uptime_component = uptime_fraction * 20.0;

    let score = (success_component + connect_component + failure_component + uptime_component).clamp(0.0, 100.0);

    let class = if score >= 80.0 {
        HealthClass::Healthy
    } else if score >= 50.0 {
        HealthClass::Degraded
    } else {
        HealthClass::Unhealthy
    };

    let mut recommendations = Vec::new();
    if success_rate < 0.5 {
        recommendations.push("success rate below 50%, check the device's advertising/pairing state".to_string());
    }
    if connect_penalty_fraction > 0.5 {
        recommendations.push("connections are slow relative to the configured timeout".to_string());
    }
    if conn.metrics.consecutive_failures >= conn.config.max_consecutive_failures.saturating_sub(1).max(1) {
        recommendations.push("consecutive failures approaching the retry ceiling, consider pausing".to_string());
    }
    if !conn.enabled {
        recommendations.push("device is disabled, no auto-connect attempts are made".to_string());
    }

    DeviceHealth { address: conn.address, score, class, recommendations }
}

struct Inner<T: ManagedTarget> {
    target: Arc<T>,
    devices: Mutex<HashMap<Address, ManagedConnection>>,
    tasks: Mutex<HashMap<Address, JoinHandle<()>>>,
    events: broadcast::Sender<Event>,
    snapshot_path: PathBuf,
    stop: tokio::sync::Notify,
    stopped: std::sync::atomic::AtomicBool,
}

/// Owns the managed-device table, one task per connected/connecting device,
/// a stability monitor and a periodic state-saver.
pub struct AutoConnectManager<T: ManagedTarget + 'static> {
    inner: Arc<Inner<T>>,
    stability_handle: Mutex<Option<JoinHandle<()>>>,
    saver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: ManagedTarget + 'static> AutoConnectManager<T> {
    pub fn new(target: T, snapshot_path: PathBuf) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let restored = persistence::to_managed_connections(persistence::load(&snapshot_path));

        let inner = Arc::new(Inner {
            target: Arc::new(target),
            devices: Mutex::new(restored),
            tasks: Mutex::new(HashMap::new()),
            events: tx,
            snapshot_path,
            stop: tokio::sync::Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
        });

        AutoConnectManager { inner, stability_handle: Mutex::new(None), saver_handle: Mutex::new(None) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    fn emit(&self, address: Option<Address>, kind: EventKind, data: impl Into<String>) {
        let _ = self.inner.events.send(Event::new(address, kind, data));
    }

    pub async fn add_device(&self, address: Address, config: ConnectionConfig) {
        {
            let mut devices = self.inner.devices.lock().await;
            devices.entry(address).or_insert_with(|| ManagedConnection::new(address, config));
        }
        self.emit(Some(address), EventKind::DeviceEnabled, "device added");
        self.save_state().await;
        self.check_connection_queue().await;
    }

    pub async fn remove_device(&self, address: Address) {
        {
            let mut tasks = self.inner.tasks.lock().await;
            if let Some(handle) = tasks.remove(&address) {
                handle.abort();
            }
        }
        {
            let mut devices = self.inner.devices.lock().await;
            devices.remove(&address);
        }
        self.save_state().await;
    }

    pub async fn enable_device(&self, address: Address, enabled: bool) {
        {
            let mut devices = self.inner.devices.lock().await;
            if let Some(conn) = devices.get_mut(&address) {
                conn.enabled = enabled;
            }
        }
        self.emit(
            Some(address),
            if enabled { EventKind::DeviceEnabled } else { EventKind::DeviceDisabled },
            "",
        );
        if enabled {
            self.check_connection_queue().await;
        }
    }

    pub async fn devices_snapshot(&self) -> Vec<ManagedConnection> {
        self.inner.devices.lock().await.values().cloned().collect()
    }

    /// Start admitting devices in high→medium→low priority order up to
    /// `max_concurrent_connections`, plus the stability monitor and periodic
    /// state-saver.
    pub async fn start(self: &Arc<Self>) {
        self.admit_initial().await;
        self.spawn_stability_monitor().await;
        self.spawn_state_saver().await;
    }

    async fn admit_initial(self: &Arc<Self>) {
        let (mut ranked, max_concurrent) = {
            let devices = self.inner.devices.lock().await;
            let mut ranked: Vec<(Address, Priority)> =
                devices.values().filter(|c| c.enabled).map(|c| (c.address, c.config.priority)).collect();
            ranked.sort_by_key(|(_, priority)| *priority);
            let max_concurrent = devices.values().next().map(|c| c.config.max_concurrent_connections).unwrap_or(5);
            (ranked, max_concurrent)
        };

        for (i, (address, _)) in ranked.drain(..).enumerate() {
            if i < max_concurrent {
                self.spawn_device_task(address).await;
            } else {
                self.emit(
                    Some(address),
                    EventKind::ConnectionAttempt,
                    format!("queued, position {}", i - max_concurrent + 1),
                );
            }
        }
    }

    /// Launches the highest-priority, non-task, enabled, disconnected device
    /// when a slot frees up.
    async fn check_connection_queue(self: &Arc<Self>) {
        let candidate = {
            let devices = self.inner.devices.lock().await;
            let tasks = self.inner.tasks.lock().await;

            let max_concurrent =
                devices.values().next().map(|c| c.config.max_concurrent_connections).unwrap_or(5);
            if tasks.len() >= max_concurrent {
                return;
            }

            devices
                .values()
                .filter(|c| c.enabled && !tasks.contains_key(&c.address) && c.state == ConnectionState::Disconnected)
                .min_by_key(|c| c.config.priority)
                .map(|c| c.address)
        };

        if let Some(address) = candidate {
            self.spawn_device_task(address).await;
        }
    }

    async fn spawn_device_task(self: &Arc<Self>, address: Address) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.run_device(address).await;
        });
        self.inner.tasks.lock().await.insert(address, handle);
    }

    /// Drives one device through the connect/retry/health-check state
    /// machine until the manager stops or the device is removed.
    async fn run_device(self: Arc<Self>, address: Address) {
        loop {
            if self.inner.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }

            let (config, should_retry, retry_delay) = {
                let devices = self.inner.devices.lock().await;
                match devices.get(&address) {
                    Some(conn) => (conn.config, conn.should_retry(), conn.next_retry_delay()),
                    None => return,
                }
            };

            if !should_retry {
                self.inner.tasks.lock().await.remove(&address);
                self.check_connection_queue().await;
                return;
            }

            self.set_state(address, ConnectionState::Connecting).await;
            self.emit(Some(address), EventKind::ConnectionAttempt, "");
            {
                let mut devices = self.inner.devices.lock().await;
                if let Some(conn) = devices.get_mut(&address) {
                    conn.metrics.record_attempt();
                }
            }

            let started = std::time::Instant::now();
            let outcome = with_timeout(config.connection_timeout, self.inner.target.connect(address)).await;

            match outcome {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    {
                        let mut devices = self.inner.devices.lock().await;
                        if let Some(conn) = devices.get_mut(&address) {
                            conn.metrics.record_success(elapsed);
                            conn.retry_count = 0;
                        }
                    }
                    self.set_state(address, ConnectionState::Connected).await;
                    self.emit(Some(address), EventKind::ConnectionSuccess, "");
                    self.run_connected(address, config).await;
                }
                Err(TargetError::Timeout) => {
                    self.record_failure(address).await;
                    self.emit(Some(address), EventKind::ConnectionTimeout, "");
                }
                Err(e) => {
                    self.record_failure(address).await;
                    self.emit(Some(address), EventKind::ConnectionError, e.to_string());
                }
            }

            if self.inner.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                _ = self.inner.stop.notified() => return,
            }
        }
    }

    /// While connected: health-probe on `health_check_interval`, with a
    /// passive staleness fallback at `2 * health_check_interval`.
    async fn run_connected(self: &Arc<Self>, address: Address, config: ConnectionConfig) {
        let mut last_activity = Utc::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(config.health_check_interval) => {}
                _ = self.inner.stop.notified() => {
                    let _ = with_timeout(config.connection_timeout, self.inner.target.disconnect(address)).await;
                    return;
                }
            }

            let current_state = {
                let devices = self.inner.devices.lock().await;
                devices.get(&address).map(|c| c.state)
            };
            if current_state != Some(ConnectionState::Connected) {
                return;
            }

            let probe = with_timeout(HEALTH_PROBE_TIMEOUT, self.inner.target.read_device_name(address)).await;
            match probe {
                Ok(_) => {
                    last_activity = Utc::now();
                    self.emit(Some(address), EventKind::HealthCheckSuccess, "");
                    let mut devices = self.inner.devices.lock().await;
                    if let Some(conn) = devices.get_mut(&address) {
                        conn.metrics.uptime += config.health_check_interval;
                    }
                }
                Err(TargetError::Timeout) => {
                    self.emit(Some(address), EventKind::HealthCheckTimeout, "");
                    self.disconnect_and_requeue(address, config).await;
                    return;
                }
                Err(e) => {
                    self.emit(Some(address), EventKind::HealthCheckFailed, e.to_string());
                    self.disconnect_and_requeue(address, config).await;
                    return;
                }
            }

            let staleness = Utc::now().signed_duration_since(last_activity);
            if staleness.num_milliseconds() as f64 / 1000.0 > 2.0 * config.health_check_interval.as_secs_f64() {
                self.emit(Some(address), EventKind::ConnectionStale, "");
                self.disconnect_and_requeue(address, config).await;
                return;
            }
        }
    }

    async fn disconnect_and_requeue(self: &Arc<Self>, address: Address, config: ConnectionConfig) {
        let _ = with_timeout(config.connection_timeout, self.inner.target.disconnect(address)).await;
        if config.reconnect_on_failure {
            self.set_state(address, ConnectionState::Disconnected).await;
        } else {
            self.set_state(address, ConnectionState::Failed).await;
        }
    }

    async fn record_failure(&self, address: Address) {
        let mut devices = self.inner.devices.lock().await;
        if let Some(conn) = devices.get_mut(&address) {
            conn.metrics.record_failure();
            conn.retry_count += 1;
            conn.state = ConnectionState::Failed;
        }
    }

    async fn set_state(&self, address: Address, state: ConnectionState) {
        let mut devices = self.inner.devices.lock().await;
        if let Some(conn) = devices.get_mut(&address) {
            conn.state = state;
        }
    }

    pub async fn pause_device(&self, address: Address, duration: StdDuration) {
        let deadline = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
        let mut devices = self.inner.devices.lock().await;
        if let Some(conn) = devices.get_mut(&address) {
            conn.pause_until(deadline);
        }
        drop(devices);
        self.emit(Some(address), EventKind::DevicePaused, "");
    }

    async fn spawn_stability_monitor(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let interval = {
                let devices = manager.inner.devices.lock().await;
                devices.values().next().map(|c| c.config.stability_check_interval).unwrap_or(StdDuration::from_secs(10))
            };
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = manager.inner.stop.notified() => return,
                }

                let mut devices = manager.inner.devices.lock().await;
                for conn in devices.values_mut() {
                    if conn.state == ConnectionState::Paused && conn.pause_elapsed(Utc::now()) {
                        conn.state = ConnectionState::Disconnected;
                        conn.paused_until = None;
                    }
                }
                let report: Vec<(Address, &'static str, u32, bool)> =
                    devices.values().map(|c| (c.address, c.state.as_str(), c.retry_count, c.enabled)).collect();
                drop(devices);
                manager.emit(None, EventKind::StabilityReport, format!("{} devices tracked", report.len()));
            }
        });
        *self.stability_handle.lock().await = Some(handle);
    }

    async fn spawn_state_saver(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(STATE_SAVE_INTERVAL) => {}
                    _ = manager.inner.stop.notified() => return,
                }
                manager.save_state().await;
            }
        });
        *self.saver_handle.lock().await = Some(handle);
    }

    async fn save_state(&self) {
        let devices = self.inner.devices.lock().await;
        match persistence::save(&self.inner.snapshot_path, &devices) {
            Ok(()) => self.emit(None, EventKind::StateSaved, ""),
            Err(e) => {
                warn!(error = %e, "failed to persist auto-connect snapshot");
                self.emit(None, EventKind::StateError, e.to_string());
            }
        }
    }

    /// Compute the per-device health analytics report over the current
    /// device table.
    pub async fn analytics_report(&self) -> Vec<DeviceHealth> {
        let devices = self.inner.devices.lock().await;
        devices.values().map(health_score).collect()
    }

    /// Cancels all per-device tasks, the stability monitor and the
    /// state-saver, then writes a final snapshot.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.stop.notify_waiters();

        let mut tasks = self.inner.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        drop(tasks);

        if let Some(handle) = self.stability_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.saver_handle.lock().await.take() {
            handle.abort();
        }

        self.save_state().await;
        info!("auto-connect manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockTarget {
        connect_calls: AtomicU32,
        fail_connect: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ManagedTarget for MockTarget {
        async fn connect(&self, _address: Address) -> Result<(), TargetError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                Err(TargetError::Timeout)
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self, _address: Address) -> Result<(), TargetError> {
            Ok(())
        }

        async fn read_device_name(&self, _address: Address) -> Result<Vec<u8>, TargetError> {
            Ok(b"mock-device".to_vec())
        }
    }

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[tokio::test]
    async fn add_device_admits_and_connects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let target = MockTarget { connect_calls: AtomicU32::new(0), fail_connect: std::sync::atomic::AtomicBool::new(false) };
        let manager = Arc::new(AutoConnectManager::new(target, path));

        manager.add_device(addr(), ConnectionConfig::default()).await;
        manager.start().await;

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let devices = manager.devices_snapshot().await;
        assert_eq!(devices.len(), 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn health_score_is_high_for_fully_successful_device() {
        let mut conn = ManagedConnection::new(addr(), ConnectionConfig::default());
        conn.metrics.record_attempt();
        conn.metrics.record_success(StdDuration::from_millis(100));
        conn.state = ConnectionState::Connected;

        let health = health_score(&conn);
        assert!(health.score > 50.0);
    }

    #[tokio::test]
    async fn health_score_is_low_with_no_successes() {
        let mut conn = ManagedConnection::new(addr(), ConnectionConfig::default());
        conn.metrics.record_attempt();
        conn.metrics.record_failure();
        conn.metrics.consecutive_failures = conn.config.max_consecutive_failures;

        let health = health_score(&conn);
        assert_eq!(health.class, HealthClass::Unhealthy);
        assert!(!health.recommendations.is_empty());
    }
}
