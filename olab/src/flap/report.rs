//! Per-target results and the SLA report.

use chrono::{DateTime, Local};
use olab_common::{DeviceId, FlapTarget, NeighborSnapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TEST_NAME: &str = "OSPF Interface Flap Test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Converged,
    TimedOut,
    SetupFailed,
}

/// Result for one flap target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub device: DeviceId,
    pub interface: String,
    pub outcome: Outcome,
    /// Restoration to FULL; for a timeout, the time spent polling.
    pub elapsed_secs: Option<f64>,
    /// Shutdown to FULL.
    pub outage_secs: Option<f64>,
    pub passed: bool,
    /// Whether the neighbor was seen leaving FULL while the interface was down.
    pub neighbor_dropped: Option<bool>,
    /// Whether every FULL baseline neighbor was FULL again after the flap.
    pub baseline_restored: Option<bool>,
    pub reason: Option<String>,
    pub baseline: Option<NeighborSnapshot>,
    pub post_flap: Option<NeighborSnapshot>,
}

impl ConvergenceResult {
    pub fn setup_failed(target: &FlapTarget, reason: impl Into<String>) -> Self {
        Self {
            device: target.device.clone(),
            interface: target.interface.clone(),
            outcome: Outcome::SetupFailed,
            elapsed_secs: None,
            outage_secs: None,
            passed: false,
            neighbor_dropped: None,
            baseline_restored: None,
            reason: Some(reason.into()),
            baseline: None,
            post_flap: None,
        }
    }

    pub fn converged(
        target: &FlapTarget,
        elapsed: Duration,
        outage: Duration,
        sla_target_secs: f64,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let mut result = Self {
            device: target.device.clone(),
            interface: target.interface.clone(),
            outcome: Outcome::Converged,
            elapsed_secs: Some(elapsed_secs),
            outage_secs: Some(outage.as_secs_f64()),
            passed: false,
            neighbor_dropped: None,
            baseline_restored: None,
            reason: None,
            baseline: None,
            post_flap: None,
        };
        result.passed = result.meets_sla(sla_target_secs);
        result
    }

    pub fn timed_out(target: &FlapTarget, polled: Duration) -> Self {
        Self {
            device: target.device.clone(),
            interface: target.interface.clone(),
            outcome: Outcome::TimedOut,
            elapsed_secs: Some(polled.as_secs_f64()),
            outage_secs: None,
            passed: false,
            neighbor_dropped: None,
            baseline_restored: None,
            reason: None,
            baseline: None,
            post_flap: None,
        }
    }

    pub fn with_baseline(mut self, baseline: NeighborSnapshot) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_neighbor_dropped(mut self, dropped: bool) -> Self {
        self.neighbor_dropped = Some(dropped);
        self
    }

    /// Attach the post-flap table and reconcile it against the baseline.
    pub fn with_post_flap(mut self, post_flap: NeighborSnapshot) -> Self {
        self.baseline_restored = self.baseline.as_ref().map(|b| post_flap.restores(b));
        self.post_flap = Some(post_flap);
        self
    }

    /// Converged within `sla_target_secs` of restoration.
    pub fn meets_sla(&self, sla_target_secs: f64) -> bool {
        self.outcome == Outcome::Converged
            && self.elapsed_secs.is_some_and(|elapsed| elapsed <= sla_target_secs)
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.device, self.interface)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub setup_failures: usize,
    /// Mean over converged targets, formatted as "3.20s".
    pub average_convergence: String,
    /// `None` when no target converged.
    pub average_convergence_secs: Option<f64>,
    pub sla_target: f64,
    pub sla_met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaReport {
    pub summary: SlaSummary,
    pub results: Vec<ConvergenceResult>,
}

/// Fold per-target results into a report.
///
/// Pass or fail is judged here against `sla_target_secs`, whatever the
/// results carried in. Results are ordered by device then interface, so
/// aggregating a report's own results yields the same report.
pub fn aggregate(results: &[ConvergenceResult], sla_target_secs: f64) -> SlaReport {
    let mut results = results.to_vec();
    for result in &mut results {
        result.passed = result.meets_sla(sla_target_secs);
    }
    results.sort_by(|a, b| {
        a.device
            .cmp(&b.device)
            .then_with(|| a.interface.cmp(&b.interface))
    });

    let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
    let total_tests = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let timed_out = count(Outcome::TimedOut);
    let setup_failures = count(Outcome::SetupFailed);

    let converged: Vec<f64> = results
        .iter()
        .filter(|r| r.outcome == Outcome::Converged)
        .filter_map(|r| r.elapsed_secs)
        .collect();
    let average_convergence_secs =
        (!converged.is_empty()).then(|| converged.iter().sum::<f64>() / converged.len() as f64);

    SlaReport {
        summary: SlaSummary {
            total_tests,
            passed,
            failed: total_tests - passed,
            timed_out,
            setup_failures,
            average_convergence: format!("{:.2}s", average_convergence_secs.unwrap_or(0.0)),
            average_convergence_secs,
            sla_target: sla_target_secs,
            sla_met: passed == total_tests,
        },
        results,
    }
}

/// On-disk envelope of `flap_test_results.json`.
#[derive(Debug, Serialize)]
pub struct ReportFile<'a> {
    pub test_name: &'static str,
    pub timestamp: DateTime<Local>,
    pub summary: &'a SlaSummary,
    pub results: &'a [ConvergenceResult],
}

impl SlaReport {
    pub fn to_file(&self, timestamp: DateTime<Local>) -> ReportFile<'_> {
        ReportFile {
            test_name: TEST_NAME,
            timestamp,
            summary: &self.summary,
            results: &self.results,
        }
    }
}
