use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::address::Address;

/// BLE 4.2 payload ceiling; exceeding it is a warning, not a hard error.
pub const MAX_BLE_PAYLOAD: usize = 251;
/// Hard protocol ceiling used to flag pathologically oversized payloads.
pub const MAX_PACKET_PAYLOAD: usize = 255;

/// Where a packet was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTag {
    OsStack,
    Sniffer,
    Classic,
}

/// What kind of radio event a packet represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Advertisement,
    ScanRequest,
    ScanResponse,
    ConnectionEvent,
    Data,
    GattRead,
    GattWrite,
    Disconnection,
    ServiceDiscovery,
    /// A sniffer frame type the wire format didn't recognize; carries the
    /// raw type byte so nothing is silently dropped.
    Unknown(u8),
}

/// A monotonic/wall-clock timestamp pair.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    pub monotonic: Instant,
    pub wall_clock: DateTime<Utc>,
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp { monotonic: Instant::now(), wall_clock: Utc::now() }
    }
}

/// A scalar value in a packet's structured metadata map.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}
impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}
impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}
impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}
impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

/// A single radio-layer event, the common currency between every collector
/// and every downstream analyzer.
#[derive(Debug, Clone)]
pub struct Packet {
    pub timestamp: Timestamp,
    pub source: SourceTag,
    pub peer: Address,
    pub rssi: i16,
    pub kind: PacketKind,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, MetadataValue>,
}

impl Packet {
    pub fn new(source: SourceTag, peer: Address, rssi: i16, kind: PacketKind, payload: Vec<u8>) -> Self {
        Packet {
            timestamp: Timestamp::now(),
            source,
            peer,
            rssi,
            kind,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// True when the payload exceeds the BLE 4.2 ceiling.
    pub fn exceeds_ble_payload(&self) -> bool {
        self.payload.len() > MAX_BLE_PAYLOAD
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_oversized_payload() {
        let addr: Address = "AA:BB:CC:DD:EE:01".parse().unwrap();
        let pkt = Packet::new(SourceTag::Sniffer, addr, -60, PacketKind::Data, vec![0u8; 252]);
        assert!(pkt.exceeds_ble_payload());
    }

    #[test]
    fn default_payload_within_limit() {
        let addr: Address = "AA:BB:CC:DD:EE:01".parse().unwrap();
        let pkt = Packet::new(SourceTag::Sniffer, addr, -60, PacketKind::Data, vec![0u8; 20]);
        assert!(!pkt.exceeds_ble_payload());
    }
}
