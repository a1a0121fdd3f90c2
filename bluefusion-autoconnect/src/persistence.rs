use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bluefusion_types::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::ConnectionConfig;
use crate::managed::ManagedConnection;
use crate::metrics::ConnectionMetrics;
use crate::state::ConnectionState;

const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error persisting auto-connect snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize auto-connect snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not resolve a home directory for the default snapshot path")]
    NoHomeDir,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceSnapshot {
    config: ConnectionConfig,
    metrics: ConnectionMetrics,
    enabled: bool,
    last_state: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: String,
    timestamp: DateTime<Utc>,
    devices: HashMap<Address, DeviceSnapshot>,
}

/// `<home>/.bluefusion/auto_connect_state.json`.
pub fn default_path() -> Result<PathBuf, PersistenceError> {
    let home = dirs::home_dir().ok_or(PersistenceError::NoHomeDir)?;
    Ok(home.join(".bluefusion").join("auto_connect_state.json"))
}

/// Atomic-replace write of the current managed-connection table.
pub fn save(path: &Path, devices: &HashMap<Address, ManagedConnection>) -> Result<(), PersistenceError> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION.to_string(),
        timestamp: Utc::now(),
        devices: devices
            .iter()
            .map(|(addr, conn)| {
                (
                    *addr,
                    DeviceSnapshot {
                        config: conn.config,
                        metrics: conn.metrics.clone(),
                        enabled: conn.enabled,
                        last_state: conn.state.as_str().to_string(),
                    },
                )
            })
            .collect(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Result of a load: the restored configs/metrics/enabled flags, keyed by
/// address. `last_state` is informational only — restored devices always
/// re-enter `Disconnected`.
pub fn load(path: &Path) -> HashMap<Address, (ConnectionConfig, ConnectionMetrics, bool)> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };

    let snapshot: Snapshot = match serde_json::from_str(&contents) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "auto-connect snapshot is corrupt, starting empty");
            return HashMap::new();
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        warn!(found = %snapshot.version, expected = SNAPSHOT_VERSION, "auto-connect snapshot version mismatch, starting empty");
        return HashMap::new();
    }

    snapshot
        .devices
        .into_iter()
        .map(|(addr, d)| (addr, (d.config, d.metrics, d.enabled)))
        .collect()
}

/// Rehydrate a fresh `ManagedConnection` table from a loaded snapshot; every
/// restored device re-enters `Disconnected` regardless of its persisted
/// `last_state`.
pub fn to_managed_connections(
    restored: HashMap<Address, (ConnectionConfig, ConnectionMetrics, bool)>,
) -> HashMap<Address, ManagedConnection> {
    restored
        .into_iter()
        .map(|(addr, (config, metrics, enabled))| {
            let mut conn = ManagedConnection::new(addr, config);
            conn.metrics = metrics;
            conn.enabled = enabled;
            conn.state = ConnectionState::Disconnected;
            (addr, conn)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[test]
    fn round_trips_configs_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut devices = HashMap::new();
        let mut conn = ManagedConnection::new(addr(), ConnectionConfig::default());
        conn.metrics.record_attempt();
        conn.metrics.record_success(std::time::Duration::from_secs(2));
        devices.insert(addr(), conn);

        save(&path, &devices).unwrap();
        let restored = load(&path);
        assert_eq!(restored.len(), 1);
        let (_, metrics, enabled) = &restored[&addr()];
        assert_eq!(metrics.successful, 1);
        assert!(enabled);
    }

    #[test]
    fn restored_devices_always_start_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut devices = HashMap::new();
        let mut conn = ManagedConnection::new(addr(), ConnectionConfig::default());
        conn.state = ConnectionState::Connected;
        devices.insert(addr(), conn);
        save(&path, &devices).unwrap();

        let restored = to_managed_connections(load(&path));
        assert_eq!(restored[&addr()].state, ConnectionState::Disconnected);
    }

    #[test]
    fn version_mismatch_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version":"0.9","timestamp":"2024-01-01T00:00:00Z","devices":{}}"#).unwrap();

        assert!(load(&path).is_empty());
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(load(&path).is_empty());
    }
}
