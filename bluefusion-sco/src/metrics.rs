use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::packet::CodecType;

/// Quality trend classification over the last 30 MOS samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

/// Full per-packet audio quality snapshot.
#[derive(Debug, Clone)]
pub struct AudioQualityMetrics {
    pub packet_loss_rate: f64,
    pub average_latency_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub jitter: f64,
    pub jitter_variance: f64,
    pub mos: f64,
    pub pesq_proxy: f64,
    pub snr_db: f64,
    pub echo_likelihood: f64,
    pub failure_probability: f64,
    pub trend: Trend,
    pub estimated_time_to_failure_secs: Option<f64>,
    pub codec_switches: u32,
    pub codec_efficiency: f64,
}

impl AudioQualityMetrics {
    /// Sensible defaults reported while fewer than 2 packets have been
    /// observed.
    pub fn default_metrics() -> Self {
        AudioQualityMetrics {
            packet_loss_rate: 0.0,
            average_latency_ms: 0.0,
            latency_p95_ms: 0.0,
            latency_p99_ms: 0.0,
            jitter: 0.0,
            jitter_variance: 0.0,
            mos: 4.0,
            pesq_proxy: 3.5,
            snr_db: 30.0,
            echo_likelihood: 0.0,
            failure_probability: 0.0,
            trend: Trend::Stable,
            estimated_time_to_failure_secs: None,
            codec_switches: 0,
            codec_efficiency: 1.0,
        }
    }
}

/// `P95`/`P99` over a sorted-as-needed slice, nearest-rank method.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Simplified E-model MOS: `R = 93.2 - impairments`, then mapped to
/// MOS and clamped to `[1.0, 4.5]`.
pub fn calculate_mos(loss: f64, latency_ms: f64, jitter: f64) -> f64 {
    let mut r = 93.2;
    if loss > 0.0 {
        r -= 2.5 * (1.0 + 10.0 * loss).ln();
    }
    if latency_ms > 150.0 {
        r -= (latency_ms - 150.0) * 0.02;
    }
    r -= jitter * 0.1;
    let r = r.clamp(0.0, 100.0);

    let mos = 1.0 + 0.035 * r + 7e-6 * r * (r - 60.0) * (100.0 - r);
    mos.clamp(1.0, 4.5)
}

/// Variance-based PESQ proxy over 16-bit PCM samples.
pub fn pesq_proxy(samples: &[i16]) -> f64 {
    if samples.len() < 80 {
        return 3.0;
    }
    let floats: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let m = mean(&floats);
    let variance = floats.iter().map(|v| (v - m).powi(2)).sum::<f64>() / floats.len() as f64;

    if variance < 100.0 {
        1.0
    } else if variance > 10_000.0 {
        2.0
    } else {
        2.0 + (variance / 4000.0).min(2.5)
    }
}

/// FFT-based SNR proxy: ratio of low-quarter to high-quarter spectral power.
pub fn snr_db(samples: &[i16]) -> f64 {
    if samples.len() < 160 {
        return 20.0;
    }
    let n = samples.len();
    let mut buffer: Vec<Complex<f64>> = samples.iter().map(|&s| Complex::new(s as f64, 0.0)).collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    let quarter = n / 4;
    let signal_power = buffer[..quarter].iter().map(|c| c.norm_sqr()).sum::<f64>() / quarter.max(1) as f64;
    let noise_slice = &buffer[3 * quarter..];
    let noise_power = noise_slice.iter().map(|c| c.norm_sqr()).sum::<f64>() / noise_slice.len().max(1) as f64;

    if noise_power > 0.0 {
        (10.0 * (signal_power / noise_power).log10()).clamp(0.0, 50.0)
    } else {
        30.0
    }
}

/// Autocorrelation-peak echo-likelihood proxy over lags 10-50ms at the
/// sample's implied rate. `sample_rate_hz` converts the fixed
/// 10-50ms window into sample-lag bounds.
pub fn echo_likelihood(samples: &[i16], sample_rate_hz: f64) -> f64 {
    if samples.len() < 320 {
        return 0.0;
    }
    let floats: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let n = floats.len();

    let lag_lo = ((0.010 * sample_rate_hz) as usize).max(1);
    let lag_hi = ((0.050 * sample_rate_hz) as usize).min(n - 1);
    if lag_hi <= lag_lo {
        return 0.0;
    }

    let autocorr_at = |lag: usize| -> f64 {
        (0..n - lag).map(|i| floats[i] * floats[i + lag]).sum::<f64>()
    };

    let zero_lag = autocorr_at(0).abs().max(1e-9);
    let peak = (lag_lo..=lag_hi).map(autocorr_at).fold(f64::MIN, f64::max);

    (peak / zero_lag).clamp(0.0, 1.0)
}

/// Base efficiency 0.9 (mSBC) / 0.8 (CVSD), discounted by loss and, below a
/// link-quality floor, by link quality.
pub fn codec_efficiency(codec: CodecType, loss: f64, link_quality: u8) -> f64 {
    let base = match codec {
        CodecType::MSbc => 0.9,
        CodecType::Cvsd => 0.8,
    };
    let mut efficiency = base * (1.0 - loss);
    if link_quality < 200 {
        efficiency *= link_quality as f64 / 255.0;
    }
    efficiency
}

/// Linear-fit slope over the most recent MOS samples classifies the trend.
pub fn quality_trend(recent_mos: &[f64]) -> Trend {
    if recent_mos.len() < 2 {
        return Trend::Stable;
    }
    let slope = linear_slope(recent_mos);
    if slope > 0.01 {
        Trend::Improving
    } else if slope < -0.01 {
        Trend::Degrading
    } else {
        Trend::Stable
    }
}

/// Ordinary least-squares slope of `y` against its index.
pub fn linear_slope(y: &[f64]) -> f64 {
    let n = y.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(y);
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &yi) in y.iter().enumerate() {
        let xi = i as f64;
        numerator += (xi - x_mean) * (yi - y_mean);
        denominator += (xi - x_mean).powi(2);
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
