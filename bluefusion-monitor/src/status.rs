use bluefusion_hfp::State as HfpState;
use bluefusion_protocol::InspectorStats;
use bluefusion_sco::AudioQualityMetrics;

/// Combined status view across every owned component, beyond the individual
/// accessors each crate already exposes.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub inspector_stats: InspectorStats,
    pub managed_connection_count: usize,
    pub connected_device_count: usize,
    pub hfp_state: Option<HfpState>,
    pub latest_sco_quality: Option<AudioQualityMetrics>,
    pub uptime_secs: u64,
}

impl MonitorStatus {
    /// One-line human summary for the `status` CLI subcommand.
    pub fn summary_line(&self) -> String {
        format!(
            "packets={} devices={}/{} hfp={} mos={}",
            self.inspector_stats.total,
            self.connected_device_count,
            self.managed_connection_count,
            self.hfp_state.map(hfp_state_label).unwrap_or("none"),
            self.latest_sco_quality.as_ref().map(|m| format!("{:.2}", m.mos)).unwrap_or_else(|| "n/a".to_string()),
        )
    }
}

fn hfp_state_label(state: HfpState) -> &'static str {
    match state {
        HfpState::Disconnected => "disconnected",
        HfpState::Connecting => "connecting",
        HfpState::SlcConnecting => "slc_connecting",
        HfpState::Connected => "connected",
        HfpState::AudioConnecting => "audio_connecting",
        HfpState::AudioConnected => "audio_connected",
        HfpState::Disconnecting => "disconnecting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_reports_na_without_sco_data() {
        let status = MonitorStatus {
            inspector_stats: InspectorStats::default(),
            managed_connection_count: 2,
            connected_device_count: 1,
            hfp_state: Some(HfpState::Connected),
            latest_sco_quality: None,
            uptime_secs: 42,
        };
        let line = status.summary_line();
        assert!(line.contains("mos=n/a"));
        assert!(line.contains("hfp=connected"));
    }
}
