use std::time::Instant;

/// SCO voice codec in use for a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    Cvsd,
    MSbc,
}

impl CodecType {
    /// Expected inter-packet interval in ms.
    pub fn expected_interval_ms(self) -> f64 {
        match self {
            CodecType::MSbc => 7.5,
            CodecType::Cvsd => 3.75,
        }
    }
}

/// A single SCO packet observation.
#[derive(Debug, Clone)]
pub struct ScoPacketInfo {
    pub timestamp: Instant,
    pub sequence_number: u32,
    pub payload_size: usize,
    pub rssi: i16,
    pub link_quality: u8,
    pub error_rate: f64,
    pub codec_type: CodecType,
    pub raw_payload: Option<Vec<i16>>,
}
