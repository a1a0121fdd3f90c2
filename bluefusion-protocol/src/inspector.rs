use std::collections::{HashMap, VecDeque};

use bluefusion_types::{MetadataValue, Packet, PacketKind, MAX_BLE_PAYLOAD};

use crate::parser::{ParsedFields, ParserRegistry};

const HISTORY_CAPACITY: usize = 1000;
const HEX_DUMP_WIDTH: usize = 16;

/// Heuristic security flags inferred from the payload alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityFlags {
    pub pairing_request: bool,
    pub encrypted: bool,
}

#[derive(Debug, Clone)]
pub struct InspectionResult {
    pub id: String,
    pub protocol: String,
    pub hex_dump: String,
    pub parsed_data: Option<ParsedFields>,
    pub parse_error: Option<String>,
    pub security: SecurityFlags,
    pub authenticated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InspectorStats {
    pub total: u64,
    pub per_protocol: HashMap<String, u64>,
    pub encrypted: u64,
    pub authenticated: u64,
    pub pairing_requests: u64,
    pub warnings: u64,
}

/// Render `data` as a 16-byte-wide hex dump with a printable-ASCII gutter.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(HEX_DUMP_WIDTH).enumerate() {
        let offset = row * HEX_DUMP_WIDTH;
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let padded = format!("{:<width$}", hex.join(" "), width = HEX_DUMP_WIDTH * 3 - 1);
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{offset:08x}  {padded}  |{ascii}|\n"));
    }
    out
}

/// Classify a payload into a protocol tag by decision order: advertisements
/// first, then ATT-over-L2CAP by CID, then bare ATT opcodes, else unknown.
pub fn classify_protocol(kind: PacketKind, payload: &[u8]) -> &'static str {
    if kind == PacketKind::Advertisement {
        return "ADV";
    }
    if payload.len() >= 4 {
        let cid = u16::from_le_bytes([payload[2], payload[3]]);
        if cid == 0x0004 {
            return "L2CAP_ATT";
        }
        if cid == 0x0005 {
            return "L2CAP_SIG";
        }
    }
    if let Some(&first) = payload.first() {
        if (0x01..=0x1E).contains(&first) || first == 0x52 || first == 0xD2 {
            return "ATT";
        }
    }
    "UNKNOWN"
}

fn security_flags(payload: &[u8]) -> SecurityFlags {
    let mut flags = SecurityFlags::default();
    if let Some(&opcode) = payload.first() {
        if opcode == 0x01 || opcode == 0x02 {
            flags.pairing_request = true;
        }
    }
    if payload.len() > 16 {
        let unique: std::collections::HashSet<u8> = payload.iter().copied().collect();
        if unique.len() as f64 > 0.7 * payload.len() as f64 {
            flags.encrypted = true;
        }
    }
    flags
}

/// Owns the parser registry, bounded inspection history and rolled-up
/// statistics.
pub struct PacketInspector {
    registry: ParserRegistry,
    history: VecDeque<InspectionResult>,
    stats: InspectorStats,
}

impl PacketInspector {
    pub fn new(registry: ParserRegistry) -> Self {
        PacketInspector { registry, history: VecDeque::with_capacity(HISTORY_CAPACITY), stats: InspectorStats::default() }
    }

    pub fn history(&self) -> &VecDeque<InspectionResult> {
        &self.history
    }

    pub fn stats(&self) -> &InspectorStats {
        &self.stats
    }

    /// Inspect a single packet, recording it into the bounded history and
    /// rolling its findings into `stats`.
    pub fn inspect(&mut self, packet: &Packet) -> &InspectionResult {
        let id = format!("{}-{}", packet.peer, packet.timestamp.wall_clock.timestamp_nanos_opt().unwrap_or_default());
        let protocol = classify_protocol(packet.kind, &packet.payload).to_string();
        let security = security_flags(&packet.payload);
        let authenticated = matches!(packet.metadata.get("authenticated"), Some(MetadataValue::Bool(true)));

        let (parsed_data, parse_error) = match self.registry.parse(&protocol, &packet.payload) {
            Some(Ok(fields)) => (Some(fields), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };

        let mut warnings = Vec::new();
        if packet.payload.len() > MAX_BLE_PAYLOAD {
            warnings.push(format!("payload length {} exceeds BLE ceiling", packet.payload.len()));
        }
        if packet.rssi > 0 {
            warnings.push(format!("RSSI {} is implausibly positive", packet.rssi));
        }
        if packet.rssi < -100 {
            warnings.push(format!("RSSI {} is implausibly low", packet.rssi));
        }
        if parse_error.is_some() {
            warnings.push("parser error".to_string());
        }

        self.stats.total += 1;
        *self.stats.per_protocol.entry(protocol.clone()).or_insert(0) += 1;
        if security.encrypted {
            self.stats.encrypted += 1;
        }
        if authenticated {
            self.stats.authenticated += 1;
        }
        if security.pairing_request {
            self.stats.pairing_requests += 1;
        }
        self.stats.warnings += warnings.len() as u64;

        let result = InspectionResult {
            id,
            protocol,
            hex_dump: hex_dump(&packet.payload),
            parsed_data,
            parse_error,
            security,
            authenticated,
            warnings,
        };

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(result);
        self.history.back().expect("just pushed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluefusion_types::{Address, SourceTag};

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[test]
    fn classifies_advertisement_kind_directly() {
        assert_eq!(classify_protocol(PacketKind::Advertisement, &[0x01]), "ADV");
    }

    #[test]
    fn classifies_att_by_leading_opcode() {
        assert_eq!(classify_protocol(PacketKind::Data, &[0x0A, 0x01, 0x00]), "ATT");
    }

    #[test]
    fn flags_pairing_request_opcode() {
        let flags = security_flags(&[0x01, 0x02, 0x03]);
        assert!(flags.pairing_request);
    }

    #[test]
    fn bounded_history_evicts_oldest() {
        let mut inspector = PacketInspector::new(ParserRegistry::with_defaults());
        for i in 0..(HISTORY_CAPACITY + 5) {
            let packet = Packet::new(SourceTag::Sniffer, addr(), -60, PacketKind::Data, vec![i as u8]);
            inspector.inspect(&packet);
        }
        assert_eq!(inspector.history().len(), HISTORY_CAPACITY);
        assert_eq!(inspector.stats().total, (HISTORY_CAPACITY + 5) as u64);
    }

    #[test]
    fn warns_on_oversized_payload() {
        let mut inspector = PacketInspector::new(ParserRegistry::with_defaults());
        let packet = Packet::new(SourceTag::Sniffer, addr(), -60, PacketKind::Data, vec![0u8; 300]);
        let result = inspector.inspect(&packet);
        assert!(result.warnings.iter().any(|w| w.contains("exceeds BLE ceiling")));
    }
}
