use std::collections::VecDeque;
use std::time::Instant;

use crate::metrics::{
    calculate_mos, codec_efficiency, echo_likelihood, mean, pesq_proxy, percentile, quality_trend, snr_db,
    std_dev, AudioQualityMetrics,
};
use crate::packet::{CodecType, ScoPacketInfo};
use crate::predictor::{
    estimate_time_to_failure, extract_features, to_failure_probability, AnomalyModel,
};

const PACKET_BUFFER_CAPACITY: usize = 10_000;
const QUALITY_HISTORY_CAPACITY: usize = 600;
const RECOMMENDATION_LOG_CAPACITY: usize = 50;
const TREND_WINDOW: usize = 30;
const PROBABILITY_WINDOW: usize = 30;
/// mSBC is carried at 16kHz in the original capture pipeline; used only to
/// convert the echo-detection window from milliseconds to samples.
const ASSUMED_SAMPLE_RATE_HZ: f64 = 16_000.0;

/// Rule-based recommendation derived from the current quality metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Reconnect,
    ForceCvsd,
    CheckCongestion,
    EnableEchoCancellation,
    CheckMicGain,
    Monitor,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Reconnect => "reconnect",
            Recommendation::ForceCvsd => "force CVSD",
            Recommendation::CheckCongestion => "check congestion",
            Recommendation::EnableEchoCancellation => "enable echo cancellation",
            Recommendation::CheckMicGain => "check mic gain",
            Recommendation::Monitor => "monitor",
        }
    }
}

fn recommend(metrics: &AudioQualityMetrics) -> Recommendation {
    if metrics.failure_probability > 0.7 {
        return Recommendation::Reconnect;
    }
    if metrics.failure_probability > 0.5 {
        if metrics.codec_switches > 5 {
            return Recommendation::ForceCvsd;
        }
        if metrics.average_latency_ms > 50.0 {
            return Recommendation::CheckCongestion;
        }
    }
    if metrics.mos < 3.0 && metrics.echo_likelihood > 0.5 {
        return Recommendation::EnableEchoCancellation;
    }
    if metrics.mos < 3.0 && metrics.snr_db < 15.0 {
        return Recommendation::CheckMicGain;
    }
    Recommendation::Monitor
}

/// Owns the packet/quality ring buffers and the optional predictor model.
pub struct ScoEstimator {
    packets: VecDeque<ScoPacketInfo>,
    quality_history: VecDeque<AudioQualityMetrics>,
    codec_switches: u32,
    last_codec: Option<CodecType>,
    model: Option<Box<dyn AnomalyModel>>,
    recommendations: VecDeque<(Instant, Recommendation)>,
}

impl ScoEstimator {
    pub fn new() -> Self {
        ScoEstimator {
            packets: VecDeque::new(),
            quality_history: VecDeque::new(),
            codec_switches: 0,
            last_codec: None,
            model: None,
            recommendations: VecDeque::new(),
        }
    }

    pub fn with_model(model: Box<dyn AnomalyModel>) -> Self {
        let mut estimator = Self::new();
        estimator.model = Some(model);
        estimator
    }

    pub fn set_model(&mut self, model: Box<dyn AnomalyModel>) {
        self.model = Some(model);
    }

    pub fn quality_history(&self) -> &VecDeque<AudioQualityMetrics> {
        &self.quality_history
    }

    pub fn recommendation_log(&self) -> &VecDeque<(Instant, Recommendation)> {
        &self.recommendations
    }

    /// Ingest one packet, update rolling state, and return its quality
    /// snapshot.
    pub fn process_packet(&mut self, packet: ScoPacketInfo) -> AudioQualityMetrics {
        if self.last_codec.map(|c| c != packet.codec_type).unwrap_or(false) {
            self.codec_switches += 1;
        }
        self.last_codec = Some(packet.codec_type);

        if self.packets.len() == PACKET_BUFFER_CAPACITY {
            self.packets.pop_front();
        }
        self.packets.push_back(packet);

        let mut metrics = self.calculate_metrics();

        if let Some(model) = &self.model {
            let features = extract_features(self.quality_history.make_contiguous(), self.codec_switches);
            let raw_score = model.score(&features);
            metrics.failure_probability = to_failure_probability(raw_score);

            let recent: Vec<f64> = self
                .quality_history
                .iter()
                .rev()
                .take(PROBABILITY_WINDOW)
                .map(|m| m.failure_probability)
                .filter(|&p| p > 0.0)
                .collect();
            metrics.estimated_time_to_failure_secs = estimate_time_to_failure(&recent);
        }

        if self.quality_history.len() == QUALITY_HISTORY_CAPACITY {
            self.quality_history.pop_front();
        }
        self.quality_history.push_back(metrics.clone());

        let recommendation = recommend(&metrics);
        if self.recommendations.len() == RECOMMENDATION_LOG_CAPACITY {
            self.recommendations.pop_front();
        }
        self.recommendations.push_back((Instant::now(), recommendation));

        metrics
    }

    fn calculate_metrics(&self) -> AudioQualityMetrics {
        if self.packets.len() < 2 {
            return AudioQualityMetrics::default_metrics();
        }

        let current = self.packets.back().unwrap();
        let oldest = self.packets.front().unwrap();
        let expected = current.sequence_number.saturating_sub(oldest.sequence_number);
        let observed = self.packets.len() as u32;
        let packet_loss_rate = if expected > 0 {
            (1.0 - observed as f64 / expected as f64).max(0.0)
        } else {
            0.0
        };

        let mut latencies = Vec::with_capacity(self.packets.len() - 1);
        for pair in self.packets.iter().collect::<Vec<_>>().windows(2) {
            let delta_ms = pair[1].timestamp.duration_since(pair[0].timestamp).as_secs_f64() * 1000.0;
            let expected_interval = pair[1].codec_type.expected_interval_ms();
            latencies.push((delta_ms - expected_interval).abs());
        }

        let average_latency_ms = mean(&latencies);
        let latency_p95_ms = percentile(&latencies, 95.0);
        let latency_p99_ms = percentile(&latencies, 99.0);
        let jitter = std_dev(&latencies);
        let jitter_variance = jitter * jitter;

        let mos = calculate_mos(packet_loss_rate, average_latency_ms, jitter);

        let (pesq, snr, echo) = match &current.raw_payload {
            Some(samples) => (
                pesq_proxy(samples),
                snr_db(samples),
                echo_likelihood(samples, ASSUMED_SAMPLE_RATE_HZ),
            ),
            None => (3.0, 20.0, 0.0),
        };

        let efficiency = codec_efficiency(current.codec_type, packet_loss_rate, current.link_quality);

        let recent_mos: Vec<f64> =
            self.quality_history.iter().rev().take(TREND_WINDOW - 1).map(|m| m.mos).collect();
        let mut mos_window = recent_mos;
        mos_window.reverse();
        mos_window.push(mos);
        let trend = quality_trend(&mos_window);

        AudioQualityMetrics {
            packet_loss_rate,
            average_latency_ms,
            latency_p95_ms,
            latency_p99_ms,
            jitter,
            jitter_variance,
            mos,
            pesq_proxy: pesq,
            snr_db: snr,
            echo_likelihood: echo,
            failure_probability: 0.0,
            trend,
            estimated_time_to_failure_secs: None,
            codec_switches: self.codec_switches,
            codec_efficiency: efficiency,
        }
    }
}

impl Default for ScoEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn packet(seq: u32, ts: Instant, codec: CodecType) -> ScoPacketInfo {
        ScoPacketInfo {
            timestamp: ts,
            sequence_number: seq,
            payload_size: 60,
            rssi: -50,
            link_quality: 220,
            error_rate: 0.0,
            codec_type: codec,
            raw_payload: None,
        }
    }

    #[test]
    fn fewer_than_two_packets_returns_default_metrics() {
        let mut estimator = ScoEstimator::new();
        let metrics = estimator.process_packet(packet(0, Instant::now(), CodecType::MSbc));
        assert_eq!(metrics.mos, AudioQualityMetrics::default_metrics().mos);
    }

    #[test]
    fn steady_stream_reports_low_loss_and_good_mos() {
        let mut estimator = ScoEstimator::new();
        let start = Instant::now();
        for seq in 0..50u32 {
            let ts = start + Duration::from_micros(7500 * seq as u64);
            estimator.process_packet(packet(seq, ts, CodecType::MSbc));
        }
        let metrics = estimator.process_packet(packet(50, start + Duration::from_micros(7500 * 50), CodecType::MSbc));
        assert!(metrics.packet_loss_rate < 0.05);
        assert!(metrics.mos > 3.5);
    }

    #[test]
    fn codec_switch_is_counted() {
        let mut estimator = ScoEstimator::new();
        let start = Instant::now();
        estimator.process_packet(packet(0, start, CodecType::Cvsd));
        let metrics = estimator.process_packet(packet(1, start + Duration::from_millis(4), CodecType::MSbc));
        assert_eq!(metrics.codec_switches, 1);
    }

    #[test]
    fn recommendation_escalates_with_failure_probability() {
        let mut high = AudioQualityMetrics::default_metrics();
        high.failure_probability = 0.9;
        assert_eq!(recommend(&high), Recommendation::Reconnect);

        let mut low_mos = AudioQualityMetrics::default_metrics();
        low_mos.mos = 2.0;
        low_mos.echo_likelihood = 0.8;
        assert_eq!(recommend(&low_mos), Recommendation::EnableEchoCancellation);

        let baseline = AudioQualityMetrics::default_metrics();
        assert_eq!(recommend(&baseline), Recommendation::Monitor);
    }
}
