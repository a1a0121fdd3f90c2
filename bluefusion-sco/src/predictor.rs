use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::metrics::{linear_slope, mean, std_dev, AudioQualityMetrics};

pub const FEATURE_COUNT: usize = 20;

/// Seam for the failure predictor: anything that maps a 20-feature vector
/// to an anomaly score in `[0, 1]` (higher = more anomalous) satisfies
/// this, so the isolation forest below can be swapped for another
/// anomaly detector.
pub trait AnomalyModel: Send + Sync {
    fn score(&self, features: &[f64; FEATURE_COUNT]) -> f64;
}

/// Extract the 20-feature vector the predictor consumes, mirroring the
/// original implementation's statistical/trend/delta/codec feature groups.
pub fn extract_features(history: &[AudioQualityMetrics], codec_switches: u32) -> [f64; FEATURE_COUNT] {
    let mut features = [0.0; FEATURE_COUNT];
    if history.is_empty() {
        return features;
    }

    let loss: Vec<f64> = history.iter().map(|m| m.packet_loss_rate).collect();
    let latency: Vec<f64> = history.iter().map(|m| m.average_latency_ms).collect();
    let jitter: Vec<f64> = history.iter().map(|m| m.jitter).collect();
    let p99: Vec<f64> = history.iter().map(|m| m.latency_p99_ms).collect();
    let mos: Vec<f64> = history.iter().map(|m| m.mos).collect();
    let snr: Vec<f64> = history.iter().map(|m| m.snr_db).collect();
    let echo: Vec<f64> = history.iter().map(|m| m.echo_likelihood).collect();

    features[0] = mean(&loss);
    features[1] = std_dev(&loss);
    features[2] = mean(&latency);
    features[3] = std_dev(&latency);
    features[4] = mean(&jitter);
    features[5] = p99.iter().cloned().fold(f64::MIN, f64::max);
    features[6] = mean(&mos);
    features[7] = mos.iter().cloned().fold(f64::MAX, f64::min);
    features[8] = mean(&snr);
    features[9] = mean(&echo);

    features[10] = linear_slope(&mos);

    if history.len() > 10 {
        let recent = &history[history.len() - 5..];
        let older = &history[history.len() - 15..history.len() - 10];
        let recent_loss: Vec<f64> = recent.iter().map(|m| m.packet_loss_rate).collect();
        let older_loss: Vec<f64> = older.iter().map(|m| m.packet_loss_rate).collect();
        let recent_latency: Vec<f64> = recent.iter().map(|m| m.average_latency_ms).collect();
        let older_latency: Vec<f64> = older.iter().map(|m| m.average_latency_ms).collect();
        let recent_jitter: Vec<f64> = recent.iter().map(|m| m.jitter).collect();
        let older_jitter: Vec<f64> = older.iter().map(|m| m.jitter).collect();

        features[11] = mean(&recent_loss) - mean(&older_loss);
        features[12] = mean(&recent_latency) - mean(&older_latency);
        features[13] = mean(&recent_jitter) - mean(&older_jitter);
    }

    features[14] = codec_switches as f64;
    features[15] = history.last().map(|m| m.codec_efficiency).unwrap_or(0.0);

    features
}

fn sigmoid_centered(score: f64) -> f64 {
    1.0 / (1.0 + (-12.0 * (score - 0.5)).exp())
}

/// Convert a raw `[0,1]` anomaly score into a failure probability via a
/// logistic squash centered on the "ambiguous" midpoint.
pub fn to_failure_probability(raw_score: f64) -> f64 {
    sigmoid_centered(raw_score.clamp(0.0, 1.0))
}

/// Linear extrapolation of the last 30 failure probabilities to the 0.8
/// threshold. Returns `None` unless the trend is rising and has
/// already crossed the "approaching failure" floor.
pub fn estimate_time_to_failure(recent_probabilities: &[f64]) -> Option<f64> {
    if recent_probabilities.len() < 10 {
        return None;
    }
    let max = recent_probabilities.iter().cloned().fold(f64::MIN, f64::max);
    if max < 0.5 {
        return None;
    }
    let slope = linear_slope(recent_probabilities);
    if slope <= 0.0 {
        return None;
    }
    let last = *recent_probabilities.last().unwrap();
    let time_to_threshold = (0.8 - last) / slope;
    Some(time_to_threshold.max(0.0))
}

const EULER_MASCHERONI: f64 = 0.5772156649;

fn harmonic(n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        (n as f64).ln() + EULER_MASCHERONI
    }
}

/// Average unsuccessful-search path length in a BST of `n` nodes; the
/// isolation-forest normalization constant.
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        1.0
    } else {
        2.0 * harmonic(n - 1) - (2.0 * (n - 1) as f64 / n as f64)
    }
}

enum Node {
    Leaf { size: usize },
    Internal { feature: usize, split: f64, left: Box<Node>, right: Box<Node> },
}

struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(samples: &[&[f64; FEATURE_COUNT]], depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
        if samples.len() <= 1 || depth >= height_limit {
            return Node::Leaf { size: samples.len() };
        }

        let feature = rng.gen_range(0..FEATURE_COUNT);
        let values: Vec<f64> = samples.iter().map(|s| s[feature]).collect();
        let (min, max) = values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if (max - min).abs() < 1e-12 {
            return Node::Leaf { size: samples.len() };
        }

        let split = rng.gen_range(min..max);
        let left: Vec<&[f64; FEATURE_COUNT]> =
            samples.iter().copied().filter(|s| s[feature] < split).collect();
        let right: Vec<&[f64; FEATURE_COUNT]> =
            samples.iter().copied().filter(|s| s[feature] >= split).collect();

        if left.is_empty() || right.is_empty() {
            return Node::Leaf { size: samples.len() };
        }

        Node::Internal {
            feature,
            split,
            left: Box::new(Self::build(&left, depth + 1, height_limit, rng)),
            right: Box::new(Self::build(&right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        fn walk(node: &Node, x: &[f64; FEATURE_COUNT], depth: f64) -> f64 {
            match node {
                Node::Leaf { size } => depth + average_path_length(*size),
                Node::Internal { feature, split, left, right } => {
                    if x[*feature] < *split {
                        walk(left, x, depth + 1.0)
                    } else {
                        walk(right, x, depth + 1.0)
                    }
                }
            }
        }
        walk(&self.root, x, 0.0)
    }
}

/// A from-scratch isolation-forest anomaly detector, trained with a fixed
/// contamination fraction that informs callers choosing a
/// failure-probability threshold; the forest itself emits a continuous
/// `[0,1]` score.
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

const DEFAULT_TREE_COUNT: usize = 100;
const DEFAULT_SUBSAMPLE_SIZE: usize = 256;
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

impl IsolationForest {
    /// Train on historical feature vectors. Mirrors the Python
    /// implementation's `train_model`: at least 100 samples are required,
    /// and only "normal" (non-failed) samples are used to fit the trees.
    pub fn train(normal_samples: &[[f64; FEATURE_COUNT]], seed: u64) -> Option<Self> {
        if normal_samples.len() < 100 {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = DEFAULT_SUBSAMPLE_SIZE.min(normal_samples.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let refs: Vec<&[f64; FEATURE_COUNT]> = normal_samples.iter().collect();
        let trees = (0..DEFAULT_TREE_COUNT)
            .map(|_| {
                let mut subsample: Vec<&[f64; FEATURE_COUNT]> = Vec::with_capacity(sample_size);
                for _ in 0..sample_size {
                    let idx = rng.gen_range(0..refs.len());
                    subsample.push(refs[idx]);
                }
                IsolationTree { root: IsolationTree::build(&subsample, 0, height_limit, &mut rng) }
            })
            .collect();

        Some(IsolationForest { trees, sample_size })
    }
}

impl AnomalyModel for IsolationForest {
    fn score(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let avg_path = mean(
            &self.trees.iter().map(|t| t.path_length(features)).collect::<Vec<_>>(),
        );
        let c = average_path_length(self.sample_size);
        2f64.powf(-avg_path / c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal_sample(rng: &mut StdRng) -> [f64; FEATURE_COUNT] {
        let mut f = [0.0; FEATURE_COUNT];
        for slot in f.iter_mut() {
            *slot = rng.gen_range(0.0..1.0);
        }
        f
    }

    #[test]
    fn forest_scores_outlier_higher_than_inlier() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<[f64; FEATURE_COUNT]> = (0..200).map(|_| normal_sample(&mut rng)).collect();
        let forest = IsolationForest::train(&samples, 42).unwrap();

        let inlier = samples[0];
        let mut outlier = [0.0; FEATURE_COUNT];
        outlier[0] = 1000.0;
        outlier[1] = -1000.0;

        assert!(forest.score(&outlier) > forest.score(&inlier));
    }

    #[test]
    fn insufficient_training_data_returns_none() {
        let samples = vec![[0.0; FEATURE_COUNT]; 10];
        assert!(IsolationForest::train(&samples, 1).is_none());
    }

    #[test]
    fn time_to_failure_requires_rising_trend_past_floor() {
        let flat = vec![0.1; 20];
        assert!(estimate_time_to_failure(&flat).is_none());

        let rising: Vec<f64> = (0..20).map(|i| 0.4 + i as f64 * 0.02).collect();
        assert!(estimate_time_to_failure(&rising).is_some());
    }

    #[test]
    fn failure_probability_is_monotone_in_raw_score() {
        assert!(to_failure_probability(0.8) > to_failure_probability(0.5));
        assert!(to_failure_probability(0.5) > to_failure_probability(0.2));
    }
}
