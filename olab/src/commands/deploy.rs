//! OSPF /31 point-to-point deployment and verification.

use super::CommandOutcome;
use crate::context::LabContext;
use crate::dispatch::dispatch;
use crate::output::{create_run_dir, write_text};
use anyhow::Result;
use chrono::Local;
use olab_common::{AddressPlan, DeviceId, NeighborSnapshot, OspfInterfaceTable, neighbors, show};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{error, info, warn};

pub const REPORT_FILE: &str = "ospf_deploy_report.txt";

#[derive(Debug, Clone, Serialize)]
pub struct PushResult {
    pub device: DeviceId,
    pub lines: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceVerification {
    pub device: DeviceId,
    pub neighbors: NeighborSnapshot,
    /// Non-loopback OSPF interfaces whose network type is not P2P, with their state.
    pub not_point_to_point: Vec<(String, String)>,
    pub error: Option<String>,
}

impl DeviceVerification {
    fn failed(device: DeviceId, error: String) -> Self {
        Self {
            device,
            neighbors: NeighborSnapshot::default(),
            not_point_to_point: Vec::new(),
            error: Some(error),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
            && !self.neighbors.is_empty()
            && self.neighbors.full_count() == self.neighbors.len()
            && self.not_point_to_point.is_empty()
    }
}

/// Push the plan one device at a time.
pub async fn push_all(ctx: &LabContext, plan: &AddressPlan) -> Vec<PushResult> {
    let mut results = Vec::new();
    for device in plan.devices() {
        let lines = plan.deploy_lines(device);
        let count = lines.len();
        let error = match ctx.pool.session_or_reason(device) {
            Err(reason) => Some(reason),
            Ok(session) => {
                info!(device = %device, lines = count, "Pushing OSPF configuration");
                let session = session.lock().await;
                session.configure(&lines).await.err().map(|e| e.to_string())
            }
        };
        match &error {
            None => info!(device = %device, "Configured"),
            Some(e) => error!(device = %device, error = %e, "Configuration failed"),
        }
        results.push(PushResult {
            device: device.clone(),
            lines: count,
            error,
        });
    }
    results
}

/// Check neighbors and OSPF network types on `devices` in parallel.
pub async fn verify_all(ctx: &LabContext, devices: Vec<DeviceId>) -> Vec<DeviceVerification> {
    let work: Vec<_> = devices
        .iter()
        .map(|d| (d.clone(), ctx.pool.session_or_reason(d)))
        .collect();
    let completed = dispatch(work, ctx.max_workers(), |(device, session)| async move {
        let session = match session {
            Ok(session) => session,
            Err(reason) => return DeviceVerification::failed(device, reason),
        };
        let session = session.lock().await;
        let neighbors = match neighbors(&**session).await {
            Ok(snapshot) => snapshot,
            Err(e) => return DeviceVerification::failed(device, e.to_string()),
        };
        let interfaces = match show::<OspfInterfaceTable>(&**session).await {
            Ok(interfaces) => interfaces,
            Err(e) => return DeviceVerification::failed(device, e.to_string()),
        };
        let not_point_to_point = interfaces
            .interfaces
            .iter()
            .filter(|i| !i.is_loopback() && !i.is_point_to_point())
            .map(|i| (i.interface.clone(), i.state.clone()))
            .collect();
        DeviceVerification {
            device,
            neighbors,
            not_point_to_point,
            error: None,
        }
    })
    .await;

    let mut verifications: Vec<_> = completed
        .into_iter()
        .map(|done| match done.result {
            Ok(v) => v,
            Err(panic) => DeviceVerification::failed(devices[done.index].clone(), panic.to_string()),
        })
        .collect();
    verifications.sort_by(|a, b| a.device.cmp(&b.device));
    verifications
}

pub fn render_report(pushes: &[PushResult], verifications: &[DeviceVerification]) -> String {
    let rule = "=".repeat(50);
    let mut out = String::new();
    let _ = writeln!(out, "OSPF Deployment Verification Report");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Configuration: Point-to-Point /31 (RFC 3021)");
    let _ = writeln!(out, "{rule}\n");

    let _ = writeln!(out, "Deployment:");
    for push in pushes {
        match &push.error {
            None => {
                let _ = writeln!(out, "  {} - configured ({} lines)", push.device, push.lines);
            }
            Some(e) => {
                let _ = writeln!(out, "  {} - FAILED: {e}", push.device);
            }
        }
    }

    let _ = writeln!(out, "\nVerification:");
    for v in verifications {
        if let Some(e) = &v.error {
            let _ = writeln!(out, "  {}: Error - {e}", v.device);
            continue;
        }
        if v.neighbors.is_empty() {
            let _ = writeln!(out, "  {}: No neighbors found", v.device);
        }
        for n in &v.neighbors.neighbors {
            let mark = if n.state.is_full() { "OK" } else { "WARN" };
            let _ = writeln!(
                out,
                "  [{mark}] {} -> {}: {} via {}",
                v.device, n.router_id, n.state, n.interface
            );
        }
        for (interface, state) in &v.not_point_to_point {
            let _ = writeln!(
                out,
                "  [WARN] {} {interface} network type is {state}, expected P2P",
                v.device
            );
        }
    }
    out
}

pub async fn run(ctx: &LabContext, plan: &AddressPlan, wait: Duration) -> Result<CommandOutcome> {
    let pushes = push_all(ctx, plan).await;
    let configured: Vec<DeviceId> = pushes
        .iter()
        .filter(|p| p.error.is_none())
        .map(|p| p.device.clone())
        .collect();
    println!(
        "Deployed: {} devices, failed: {}",
        configured.len(),
        pushes.len() - configured.len()
    );

    info!(wait_secs = wait.as_secs_f64(), "Waiting for OSPF convergence");
    tokio::time::sleep(wait).await;

    let verifications = verify_all(ctx, configured).await;
    for v in verifications.iter().filter(|v| !v.passed()) {
        warn!(device = %v.device, error = ?v.error, "Verification failed");
    }

    let report = render_report(&pushes, &verifications);
    print!("{report}");
    let run_dir = create_run_dir(&ctx.config.lab.results_dir, "ospf_deploy", Local::now())?;
    write_text(&run_dir.join(REPORT_FILE), &report)?;

    let success = pushes.iter().all(|p| p.error.is_none())
        && verifications.iter().all(DeviceVerification::passed);
    Ok(CommandOutcome {
        success,
        run_dir: Some(run_dir),
    })
}
