//! Interface flap SLA run.

use super::CommandOutcome;
use crate::context::{LabContext, SharedSession};
use crate::dispatch::{dispatch, panic_message};
use crate::flap::report::{ConvergenceResult, Outcome, SlaReport, aggregate};
use crate::flap::{FlapSettings, run_target};
use crate::output::{create_run_dir, write_json};
use anyhow::Result;
use chrono::Local;
use futures::FutureExt;
use olab_common::{DeviceId, FlapTarget};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};

pub const RESULTS_FILE: &str = "flap_test_results.json";

/// Flap every configured target.
///
/// Targets are grouped by device and each group is one dispatched unit, so a
/// device's targets run one after another under its session lock while up to
/// `max_workers` devices flap in parallel. A worker slot is never spent
/// waiting on another target's lock.
pub async fn flap_all(ctx: &LabContext) -> SlaReport {
    let settings = FlapSettings::from(&ctx.config.lab.flap);
    let mut groups: BTreeMap<DeviceId, Vec<FlapTarget>> = BTreeMap::new();
    for target in &ctx.config.lab.flap.targets {
        groups
            .entry(target.device.clone())
            .or_default()
            .push(target.clone());
    }
    let work: Vec<_> = groups
        .into_iter()
        .map(|(device, targets)| (targets, ctx.pool.session_or_reason(&device)))
        .collect();
    let grouped: Vec<Vec<FlapTarget>> = work.iter().map(|(targets, _)| targets.clone()).collect();

    let per_device = settings.clone();
    let completed = dispatch(work, ctx.max_workers(), move |(targets, session)| {
        flap_device(targets, session, per_device.clone())
    })
    .await;

    let results: Vec<ConvergenceResult> = completed
        .into_iter()
        .flat_map(|done| match done.result {
            Ok(results) => results,
            Err(panic) => grouped[done.index]
                .iter()
                .map(|target| ConvergenceResult::setup_failed(target, panic.to_string()))
                .collect(),
        })
        .collect();
    aggregate(&results, settings.sla_target_secs)
}

async fn flap_device(
    targets: Vec<FlapTarget>,
    session: Result<SharedSession, String>,
    settings: FlapSettings,
) -> Vec<ConvergenceResult> {
    let session = match session {
        Ok(session) => session,
        Err(reason) => {
            return targets
                .iter()
                .map(|target| {
                    warn!(
                        device = %target.device,
                        interface = %target.interface,
                        %reason,
                        "No session for target"
                    );
                    ConvergenceResult::setup_failed(target, reason.clone())
                })
                .collect();
        }
    };

    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let flap = run_target(Arc::clone(&session), target.clone(), settings.clone());
        let result = match AssertUnwindSafe(flap).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                ConvergenceResult::setup_failed(&target, panic_message(payload).to_string())
            }
        };
        results.push(result);
    }
    results
}

fn result_line(result: &ConvergenceResult) -> String {
    let status = if result.passed { "PASS" } else { "FAIL" };
    let detail = match result.outcome {
        Outcome::Converged => format!(
            "converged in {:.2}s (outage {:.2}s)",
            result.elapsed_secs.unwrap_or_default(),
            result.outage_secs.unwrap_or_default()
        ),
        Outcome::TimedOut => format!(
            "timed out after {:.2}s",
            result.elapsed_secs.unwrap_or_default()
        ),
        Outcome::SetupFailed => format!(
            "setup failed: {}",
            result.reason.as_deref().unwrap_or("unknown")
        ),
    };
    format!("[{status}] {} {detail}", result.label())
}

fn print_summary(report: &SlaReport) {
    let s = &report.summary;
    println!("{}", "=".repeat(60));
    println!("OSPF INTERFACE FLAP TEST SUMMARY");
    println!("{}", "=".repeat(60));
    for result in &report.results {
        println!("{}", result_line(result));
    }
    println!("{}", "-".repeat(60));
    println!(
        "Total: {}  Passed: {}  Failed: {}  Timed out: {}  Setup failures: {}",
        s.total_tests, s.passed, s.failed, s.timed_out, s.setup_failures
    );
    println!("Average convergence: {}", s.average_convergence);
    println!(
        "SLA target: {:.2}s  SLA met: {}",
        s.sla_target,
        if s.sla_met { "yes" } else { "no" }
    );
}

pub async fn run(ctx: &LabContext) -> Result<CommandOutcome> {
    let targets: Vec<String> = ctx
        .config
        .lab
        .flap
        .targets
        .iter()
        .map(FlapTarget::to_string)
        .collect();
    info!(targets = ?targets, "Starting flap run");

    let report = flap_all(ctx).await;
    let run_dir = create_run_dir(&ctx.config.lab.results_dir, "ospf_flap", Local::now())?;
    write_json(&run_dir.join(RESULTS_FILE), &report.to_file(Local::now()))?;

    print_summary(&report);
    info!(
        passed = report.summary.passed,
        total = report.summary.total_tests,
        sla_met = report.summary.sla_met,
        dir = %run_dir.display(),
        "Flap run complete"
    );

    Ok(CommandOutcome {
        success: report.summary.sla_met,
        run_dir: Some(run_dir),
    })
}
