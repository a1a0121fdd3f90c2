//! SCO audio quality estimation: packet-loss/latency/jitter metrics, MOS via
//! a simplified E-model, PESQ/SNR/echo proxies and a predictive
//! anomaly-based failure estimator.

mod estimator;
mod metrics;
mod packet;
mod predictor;

pub use estimator::{Recommendation, ScoEstimator};
pub use metrics::{AudioQualityMetrics, Trend};
pub use packet::{CodecType, ScoPacketInfo};
pub use predictor::{
    extract_features, to_failure_probability, AnomalyModel, IsolationForest, DEFAULT_CONTAMINATION, FEATURE_COUNT,
};
