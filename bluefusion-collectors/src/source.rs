use async_trait::async_trait;
use bluefusion_types::Packet;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("BLE stack error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no matching serial port found during auto-detect")]
    PortNotFound,
    #[error("port write failed: {0}")]
    WriteFailed(String),
    #[error("operation requires pairing and the retry after pairing also failed: {0}")]
    SecurityRetryExhausted(String),
}

/// Shared contract for both collector kinds:
/// a broadcast stream of decoded packets, plus whatever commands the
/// concrete source understands. `UnifiedMonitor` (C13) holds a
/// `Vec<Box<dyn PacketSource>>` rather than a closed enum, so a third
/// collector kind is additive, not a match-arm rewrite.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Human-readable identity for status reporting ("sniffer:/dev/ttyUSB0",
    /// "os-ble:hci0").
    fn name(&self) -> String;

    /// Subscribe to this source's packet stream. Each call returns an
    /// independent receiver so multiple consumers (the unified monitor's
    /// BLE loop, a future recorder) can observe the same traffic.
    fn subscribe(&self) -> broadcast::Receiver<Packet>;

    /// Send a source-specific command (sniffer: `"START"`, `"MODE ACTIVE"`,
    /// `"CHANNEL 37"`; OS BLE sources may no-op).
    async fn send_command(&self, cmd: &str) -> Result<(), CollectorError>;
}
