use std::time::Duration;

use bluefusion_hfp::{analyze, FailureReport, HfpSession};
use bluefusion_sco::AudioQualityMetrics;
use bluefusion_types::Address;
use tracing::info;

/// Which step of the `test_hfp_connection` flow a failure occurred at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    HfpConnect,
    ScoEstablish,
    QualitySample,
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    pub success: bool,
    pub detail: String,
}

/// Structured report for one `test_hfp_connection(address)` run: per-step
/// success, and the C11 analyzer output when any step failed.
#[derive(Debug, Clone)]
pub struct HfpTestReport {
    pub address: Address,
    pub steps: Vec<StepResult>,
    pub quality: Option<AudioQualityMetrics>,
    pub failure_analysis: Option<FailureReport>,
}

impl HfpTestReport {
    pub fn overall_success(&self) -> bool {
        self.steps.iter().all(|s| s.success)
    }
}

/// The capability surface `test_hfp_connection` needs: connect/disconnect
/// the HFP service link, establish the SCO audio link, and sample a quality
/// snapshot after a hold period. A real implementation drives the classic
/// Bluetooth stack; tests substitute a scripted fake.
#[async_trait::async_trait]
pub trait HfpTestTarget: Send + Sync {
    async fn connect_hfp(&self, address: Address) -> Result<(), String>;
    async fn establish_sco(&self, address: Address) -> Result<(), String>;
    async fn sample_quality(&self, address: Address, hold: Duration) -> Result<AudioQualityMetrics, String>;
    async fn disconnect(&self, address: Address) -> Result<(), String>;
}

const QUALITY_SAMPLE_WINDOW: Duration = Duration::from_secs(5);

/// Runs the fixed four-step diagnostic flow, stopping at the first
/// failed step and attaching the C11 failure analysis when `session` is
/// supplied.
pub async fn test_hfp_connection(
    target: &dyn HfpTestTarget,
    address: Address,
    session: Option<&HfpSession>,
) -> HfpTestReport {
    let mut steps = Vec::new();
    let mut quality = None;

    let hfp_ok = match target.connect_hfp(address).await {
        Ok(()) => {
            steps.push(StepResult { step: Step::HfpConnect, success: true, detail: "connected".to_string() });
            true
        }
        Err(e) => {
            steps.push(StepResult { step: Step::HfpConnect, success: false, detail: e });
            false
        }
    };

    let sco_ok = hfp_ok
        && match target.establish_sco(address).await {
            Ok(()) => {
                steps.push(StepResult { step: Step::ScoEstablish, success: true, detail: "established".to_string() });
                true
            }
            Err(e) => {
                steps.push(StepResult { step: Step::ScoEstablish, success: false, detail: e });
                false
            }
        };

    if sco_ok {
        match target.sample_quality(address, QUALITY_SAMPLE_WINDOW).await {
            Ok(metrics) => {
                steps.push(StepResult {
                    step: Step::QualitySample,
                    success: true,
                    detail: format!("mos={:.2}", metrics.mos),
                });
                quality = Some(metrics);
            }
            Err(e) => {
                steps.push(StepResult { step: Step::QualitySample, success: false, detail: e });
            }
        }
    }

    match target.disconnect(address).await {
        Ok(()) => steps.push(StepResult { step: Step::Disconnect, success: true, detail: "disconnected".to_string() }),
        Err(e) => steps.push(StepResult { step: Step::Disconnect, success: false, detail: e }),
    }

    let failure_analysis = if steps.iter().any(|s| !s.success) {
        session.map(analyze)
    } else {
        None
    };

    info!(%address, success = steps.iter().all(|s| s.success), "hfp connection test complete");

    HfpTestReport { address, steps, quality, failure_analysis }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedTarget {
        fail_at_sco: AtomicBool,
    }

    #[async_trait::async_trait]
    impl HfpTestTarget for ScriptedTarget {
        async fn connect_hfp(&self, _address: Address) -> Result<(), String> {
            Ok(())
        }

        async fn establish_sco(&self, _address: Address) -> Result<(), String> {
            if self.fail_at_sco.load(Ordering::SeqCst) {
                Err("SCO link rejected".to_string())
            } else {
                Ok(())
            }
        }

        async fn sample_quality(&self, _address: Address, _hold: Duration) -> Result<AudioQualityMetrics, String> {
            Ok(AudioQualityMetrics::default_metrics())
        }

        async fn disconnect(&self, _address: Address) -> Result<(), String> {
            Ok(())
        }
    }

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[tokio::test]
    async fn full_success_runs_all_four_steps() {
        let target = ScriptedTarget { fail_at_sco: AtomicBool::new(false) };
        let report = test_hfp_connection(&target, addr(), None).await;

        assert!(report.overall_success());
        assert_eq!(report.steps.len(), 4);
        assert!(report.quality.is_some());
        assert!(report.failure_analysis.is_none());
    }

    #[tokio::test]
    async fn sco_failure_skips_quality_sample_but_still_disconnects() {
        let target = ScriptedTarget { fail_at_sco: AtomicBool::new(true) };
        let report = test_hfp_connection(&target, addr(), None).await;

        assert!(!report.overall_success());
        assert!(!report.steps.iter().any(|s| s.step == Step::QualitySample));
        assert!(report.steps.iter().any(|s| s.step == Step::Disconnect && s.success));
    }
}
