use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bluefusion_analysis::shannon_entropy;
use bluefusion_autoconnect::AutoConnectManager;
use bluefusion_collectors::{CollectorError, OsBleSource, PacketSource};
use bluefusion_hfp::{HfpSession, Role};
use bluefusion_protocol::{PacketInspector, ParserRegistry};
use bluefusion_sco::ScoEstimator;
use bluefusion_security::{BondStore, PairingCallback, SecurityManager};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::status::MonitorStatus;

const BLE_SCAN_INTERVAL: Duration = Duration::from_secs(30);
const CLASSIC_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const HFP_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
const HIGH_ENTROPY_THRESHOLD: f64 = 7.5;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Collector(#[from] CollectorError),
}

/// Per-scan-cycle bookkeeping emitted as a tracing event.
#[derive(Debug, Clone, Copy)]
pub enum ScanEvent {
    BleScanStarted,
    BleScanStopped,
    ClassicScanStarted,
    ClassicScanStopped,
}

struct Tasks {
    ble_packet_loop: Option<JoinHandle<()>>,
    ble_scan_loop: Option<JoinHandle<()>>,
    classic_scan_loop: Option<JoinHandle<()>>,
    hfp_monitor_loop: Option<JoinHandle<()>>,
}

/// Owns one instance each of the collectors, security manager, auto-connect
/// manager, HFP handler and SCO estimator, plus a packet inspector
/// configured with the protocol parser registry, and runs their concurrent
/// task set.
pub struct UnifiedMonitor {
    ble: Arc<OsBleSource>,
    inspector: Mutex<PacketInspector>,
    security: Mutex<SecurityManager>,
    autoconnect: Arc<AutoConnectManager<Arc<OsBleSource>>>,
    hfp: Mutex<HfpSession>,
    sco: Mutex<ScoEstimator>,
    started_at: Instant,
    tasks: Mutex<Tasks>,
}

impl UnifiedMonitor {
    pub async fn new(
        adapter_hint: Option<&str>,
        bond_store_path: PathBuf,
        auto_connect_snapshot_path: PathBuf,
        pairing_callback: Box<dyn PairingCallback>,
    ) -> Result<Self, MonitorError> {
        let ble = Arc::new(OsBleSource::new(adapter_hint).await?);
        let inspector = PacketInspector::new(ParserRegistry::with_defaults());
        let bonds = BondStore::load(&bond_store_path);
        let security = SecurityManager::new(bonds, pairing_callback);
        let autoconnect = Arc::new(AutoConnectManager::new(Arc::clone(&ble), auto_connect_snapshot_path));

        Ok(UnifiedMonitor {
            ble,
            inspector: Mutex::new(inspector),
            security: Mutex::new(security),
            autoconnect,
            hfp: Mutex::new(HfpSession::new(Role::Hf)),
            sco: Mutex::new(ScoEstimator::new()),
            started_at: Instant::now(),
            tasks: Mutex::new(Tasks {
                ble_packet_loop: None,
                ble_scan_loop: None,
                classic_scan_loop: None,
                hfp_monitor_loop: None,
            }),
        })
    }

    pub fn autoconnect(&self) -> &Arc<AutoConnectManager<Arc<OsBleSource>>> {
        &self.autoconnect
    }

    pub async fn security(&self) -> tokio::sync::MutexGuard<'_, SecurityManager> {
        self.security.lock().await
    }

    /// Starts the four concurrent loops (BLE packet consumption, BLE scan,
    /// classic scan, HFP stall check) plus the auto-connect manager's own
    /// task families.
    pub async fn start(self: &Arc<Self>) {
        self.autoconnect.start().await;

        let mut tasks = self.tasks.lock().await;
        tasks.ble_packet_loop = Some(self.spawn_ble_packet_loop());
        tasks.ble_scan_loop = Some(self.spawn_ble_scan_loop());
        tasks.classic_scan_loop = Some(self.spawn_classic_scan_loop());
        tasks.hfp_monitor_loop = Some(self.spawn_hfp_monitor_loop());
    }

    pub async fn stop(&self) {
        self.autoconnect.stop().await;
        let mut tasks = self.tasks.lock().await;
        for handle in
            [tasks.ble_packet_loop.take(), tasks.ble_scan_loop.take(), tasks.classic_scan_loop.take(), tasks.hfp_monitor_loop.take()]
        {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
    }

    /// Consumes the BLE collector's stream, runs each packet through the
    /// inspector.
    fn spawn_ble_packet_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let mut rx = monitor.ble.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(packet) => {
                        let mut inspector = monitor.inspector.lock().await;
                        let result = inspector.inspect(&packet);
                        if result.parsed_data.is_none() && !packet.payload.is_empty() {
                            let entropy = shannon_entropy(&packet.payload);
                            if entropy > HIGH_ENTROPY_THRESHOLD {
                                tracing::debug!(peer = %packet.peer, entropy, "unparsed high-entropy payload, likely encrypted");
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "ble packet loop lagged, some packets were dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    /// Periodic BLE discovery scan, 30 s interval.
    fn spawn_ble_scan_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(BLE_SCAN_INTERVAL).await;
                info!(event = ?ScanEvent::BleScanStarted, "periodic BLE scan");
                if let Err(e) = monitor.ble.start_scan(true).await {
                    error!(error = %e, "BLE scan failed to start");
                    continue;
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                let _ = monitor.ble.stop_scan().await;
                info!(event = ?ScanEvent::BleScanStopped, "periodic BLE scan complete");
            }
        })
    }

    /// Periodic classic Bluetooth discovery scan, 60 s interval.
    /// Classic scanning is source-specific; sources that don't support it
    /// treat the command as a no-op, per `PacketSource::send_command`'s
    /// contract.
    fn spawn_classic_scan_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLASSIC_SCAN_INTERVAL).await;
                info!(event = ?ScanEvent::ClassicScanStarted, "periodic classic scan");
                if let Err(e) = monitor.ble.send_command("SCAN_CLASSIC").await {
                    error!(error = %e, "classic scan command failed");
                }
                info!(event = ?ScanEvent::ClassicScanStopped, "periodic classic scan complete");
            }
        })
    }

    /// Inspects HFP session state for failure signatures every 5 s.
    fn spawn_hfp_monitor_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HFP_MONITOR_INTERVAL).await;
                let session = monitor.hfp.lock().await;
                if session.state == bluefusion_hfp::State::SlcConnecting
                    || session.state == bluefusion_hfp::State::AudioConnecting
                {
                    let report = bluefusion_hfp::analyze(&session);
                    if !report.issues.is_empty() {
                        tracing::warn!(issues = ?report.issues, "hfp monitor loop detected a stalled session");
                    }
                }
            }
        })
    }

    /// The combined status snapshot across collectors, bonds and managed
    /// connections.
    pub async fn status(&self) -> MonitorStatus {
        let inspector = self.inspector.lock().await;
        let devices = self.autoconnect.devices_snapshot().await;
        let connected = devices
            .iter()
            .filter(|d| d.state == bluefusion_autoconnect::ConnectionState::Connected)
            .count();
        let hfp = self.hfp.lock().await;
        let sco = self.sco.lock().await;

        MonitorStatus {
            inspector_stats: inspector.stats().clone(),
            managed_connection_count: devices.len(),
            connected_device_count: connected,
            hfp_state: Some(hfp.state),
            latest_sco_quality: sco.quality_history().back().cloned(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_event_debug_is_stable() {
        assert_eq!(format!("{:?}", ScanEvent::BleScanStarted), "BleScanStarted");
    }
}
