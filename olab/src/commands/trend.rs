//! Convergence trends across earlier flap runs.
//!
//! Reads every `ospf_flap_*/flap_test_results.json` under the results
//! directory, oldest first, and reports per-interface convergence statistics
//! together with overall stability. Nothing here talks to a device.

use super::CommandOutcome;
use super::flap::RESULTS_FILE;
use crate::flap::report::{ConvergenceResult, Outcome, SlaSummary};
use crate::output::write_text;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use olab_common::NeighborSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const REPORT_FILE: &str = "trend_analysis.txt";

const RUN_PREFIX: &str = "ospf_flap_";

/// Share of tests with a neighbor state change above which roles count as unstable.
const STATE_CHANGE_WARN_RATIO: f64 = 0.3;

/// A `flap_test_results.json` read back from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredRun {
    pub timestamp: DateTime<Local>,
    pub summary: SlaSummary,
    pub results: Vec<ConvergenceResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    /// Run directory suffix, e.g. `20260314_092653`.
    pub run: String,
    pub secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Improving => "IMPROVING",
            Self::Degrading => "DEGRADING",
            Self::Stable => "STABLE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceTrend {
    pub measurements: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub first_half_avg: f64,
    pub second_half_avg: f64,
    pub trend: Trend,
    pub data: Vec<Measurement>,
}

impl InterfaceTrend {
    /// Statistics over at least two measurements, in run order.
    fn from_measurements(data: Vec<Measurement>) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let times: Vec<f64> = data.iter().map(|m| m.secs).collect();
        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        let (first, second) = times.split_at(times.len() / 2);
        let first_half_avg = mean(first);
        let second_half_avg = mean(second);
        let trend = if second_half_avg < first_half_avg {
            Trend::Improving
        } else if second_half_avg > first_half_avg {
            Trend::Degrading
        } else {
            Trend::Stable
        };
        Some(Self {
            measurements: times.len(),
            average: mean(times.as_slice()),
            min: times.iter().copied().fold(f64::INFINITY, f64::min),
            max: times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            first_half_avg,
            second_half_avg,
            trend,
            data,
        })
    }

    /// Relative change between the halves, as a percentage of the first.
    pub fn change_percent(&self) -> f64 {
        if self.first_half_avg == 0.0 {
            return 0.0;
        }
        (self.second_half_avg - self.first_half_avg).abs() / self.first_half_avg * 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stability {
    pub runs: usize,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub setup_failures: usize,
    /// Baseline neighbors present after the flap in a different state.
    pub state_changes: usize,
    /// Baseline neighbors missing after the flap.
    pub lost_neighbors: usize,
    /// Mean over converged targets; `None` when none converged.
    pub average_convergence_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub stability: Stability,
    /// Keyed by `device:interface`.
    pub interfaces: BTreeMap<String, InterfaceTrend>,
}

/// Result files of earlier flap runs, oldest first.
///
/// Run directories are named by timestamp, so name order is run order.
pub fn find_result_files(results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !results_dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(results_dir)
        .with_context(|| format!("Failed to read {}", results_dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_run = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(RUN_PREFIX));
        let file = path.join(RESULTS_FILE);
        if is_run && file.is_file() {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

fn run_label(file: &Path) -> String {
    file.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .map(|name| name.trim_start_matches(RUN_PREFIX).to_string())
        .unwrap_or_default()
}

/// Load every file, skipping the ones that cannot be read.
pub fn load_runs(files: &[PathBuf]) -> Vec<(String, StoredRun)> {
    let mut runs = Vec::with_capacity(files.len());
    for file in files {
        let loaded = std::fs::read_to_string(file)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<StoredRun>(&raw).map_err(anyhow::Error::from));
        match loaded {
            Ok(run) => runs.push((run_label(file), run)),
            Err(e) => warn!(file = %file.display(), error = %e, "Skipping unreadable result file"),
        }
    }
    runs
}

/// Count baseline neighbors whose state changed or that went missing.
fn neighbor_changes(baseline: &NeighborSnapshot, post_flap: &NeighborSnapshot) -> (usize, usize) {
    let mut changed = 0;
    let mut lost = 0;
    for before in &baseline.neighbors {
        match post_flap.find(before.router_id, &before.interface) {
            Some(after) if after.state != before.state => changed += 1,
            Some(_) => {}
            None => lost += 1,
        }
    }
    (changed, lost)
}

pub fn analyze(runs: &[(String, StoredRun)]) -> TrendReport {
    let mut stability = Stability {
        runs: runs.len(),
        ..Stability::default()
    };
    let mut by_interface: BTreeMap<String, Vec<Measurement>> = BTreeMap::new();
    let mut converged = Vec::new();

    for (label, run) in runs {
        for result in &run.results {
            stability.total_tests += 1;
            if result.passed {
                stability.passed += 1;
            } else {
                stability.failed += 1;
            }
            match result.outcome {
                Outcome::Converged => {
                    if let Some(secs) = result.elapsed_secs {
                        converged.push(secs);
                        by_interface.entry(result.label()).or_default().push(Measurement {
                            run: label.clone(),
                            secs,
                        });
                    }
                }
                Outcome::TimedOut => stability.timed_out += 1,
                Outcome::SetupFailed => stability.setup_failures += 1,
            }
            if let (Some(baseline), Some(post_flap)) = (&result.baseline, &result.post_flap) {
                let (changed, lost) = neighbor_changes(baseline, post_flap);
                stability.state_changes += changed;
                stability.lost_neighbors += lost;
            }
        }
    }
    stability.average_convergence_secs =
        (!converged.is_empty()).then(|| converged.iter().sum::<f64>() / converged.len() as f64);

    let interfaces = by_interface
        .into_iter()
        .filter_map(|(key, data)| InterfaceTrend::from_measurements(data).map(|t| (key, t)))
        .collect();
    TrendReport {
        stability,
        interfaces,
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl TrendReport {
    pub fn degrading(&self) -> Vec<&str> {
        self.interfaces
            .iter()
            .filter(|(_, t)| t.trend == Trend::Degrading)
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn render(&self, generated: DateTime<Local>, sla_target_secs: f64) -> String {
        let s = &self.stability;
        let mut out = String::new();
        let _ = writeln!(out, "{}", "=".repeat(80));
        let _ = writeln!(out, "OSPF FLAP TEST - TREND ANALYSIS REPORT");
        let _ = writeln!(out, "{}", "=".repeat(80));
        let _ = writeln!(out, "Generated: {}", generated.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out);

        let _ = writeln!(out, "OVERALL STABILITY");
        let _ = writeln!(out, "{}", "-".repeat(80));
        let _ = writeln!(out, "Runs:               {}", s.runs);
        let _ = writeln!(out, "Total tests:        {}", s.total_tests);
        let _ = writeln!(
            out,
            "Passed:             {} ({:.1}%)",
            s.passed,
            percent(s.passed, s.total_tests)
        );
        let _ = writeln!(
            out,
            "Failed:             {} ({:.1}%)",
            s.failed,
            percent(s.failed, s.total_tests)
        );
        let _ = writeln!(out, "  Timed out:        {}", s.timed_out);
        let _ = writeln!(out, "  Setup failures:   {}", s.setup_failures);
        let _ = writeln!(out, "State changes:      {}", s.state_changes);
        let _ = writeln!(out, "Lost neighbors:     {}", s.lost_neighbors);
        let _ = writeln!(
            out,
            "Avg convergence:    {:.2} seconds",
            s.average_convergence_secs.unwrap_or(0.0)
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "CONVERGENCE TRENDS BY INTERFACE");
        let _ = writeln!(out, "{}", "-".repeat(80));
        for (key, t) in &self.interfaces {
            let _ = writeln!(out, "\n{key}");
            let _ = writeln!(out, "  Measurements:     {}", t.measurements);
            let _ = writeln!(out, "  Average:          {:.2} seconds", t.average);
            let _ = writeln!(out, "  Min:              {:.2} seconds", t.min);
            let _ = writeln!(out, "  Max:              {:.2} seconds", t.max);
            let _ = writeln!(out, "  Trend:            {}", t.trend);
            match t.trend {
                Trend::Improving => {
                    let _ = writeln!(out, "  Improvement:      {:.1}%", t.change_percent());
                }
                Trend::Degrading => {
                    let _ = writeln!(out, "  Degradation:      {:.1}%", t.change_percent());
                }
                Trend::Stable => {}
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "RECOMMENDATIONS");
        let _ = writeln!(out, "{}", "-".repeat(80));
        let degrading = self.degrading();
        if !degrading.is_empty() {
            let _ = writeln!(out, "WARNING: convergence is degrading on:");
            for key in &degrading {
                let _ = writeln!(out, "  - {key}");
            }
            let _ = writeln!(
                out,
                "  Check recent changes, traffic load and hardware on these links."
            );
        }
        if s.total_tests > 0
            && s.state_changes as f64 > s.total_tests as f64 * STATE_CHANGE_WARN_RATIO
        {
            let _ = writeln!(out, "WARNING: neighbor states often differ after a flap.");
            let _ = writeln!(out, "  Consider fixed OSPF priorities to stabilize DR/BDR roles.");
        }
        if s
            .average_convergence_secs
            .is_some_and(|avg| avg > sla_target_secs)
        {
            let _ = writeln!(
                out,
                "WARNING: average convergence exceeds the {sla_target_secs:.2}s SLA target."
            );
            let _ = writeln!(out, "  Tune the OSPF hello and dead intervals.");
        }
        if degrading.is_empty() && s.failed == 0 {
            let _ = writeln!(out, "Convergence is stable with no degradation.");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "=".repeat(80));
        out
    }
}

/// Analyze every flap run under `results_dir`.
///
/// Fails the check only when there is nothing to analyze. The text report
/// lands in `results_dir` next to the run directories.
pub fn run(results_dir: &Path, sla_target_secs: f64, json: bool) -> Result<CommandOutcome> {
    let files = find_result_files(results_dir)?;
    if files.is_empty() {
        warn!(dir = %results_dir.display(), "No flap result files found");
        println!("No flap result files found in {}", results_dir.display());
        return Ok(CommandOutcome {
            success: false,
            run_dir: None,
        });
    }

    let runs = load_runs(&files);
    let report = analyze(&runs);
    info!(
        files = files.len(),
        runs = runs.len(),
        tests = report.stability.total_tests,
        interfaces = report.interfaces.len(),
        "Trend analysis complete"
    );

    let text = report.render(Local::now(), sla_target_secs);
    write_text(&results_dir.join(REPORT_FILE), &text)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{text}");
    }

    Ok(CommandOutcome {
        success: true,
        run_dir: Some(results_dir.to_path_buf()),
    })
}
