//! Remove the OSPF fabric from every device.

use super::{CommandOutcome, inventory_work};
use crate::context::LabContext;
use crate::dispatch::dispatch;
use anyhow::Result;
use olab_common::{AddressPlan, DeviceId, OspfProcessStatus, show};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct ResetResult {
    pub device: DeviceId,
    pub ospf_running: Option<bool>,
    pub error: Option<String>,
}

impl ResetResult {
    fn failed(device: DeviceId, error: String) -> Self {
        Self {
            device,
            ospf_running: None,
            error: Some(error),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.ospf_running == Some(false)
    }
}

/// Apply the reset command set to every inventory device and confirm OSPF is gone.
pub async fn reset_all(ctx: &LabContext, plan: &AddressPlan) -> Vec<ResetResult> {
    let lines: HashMap<DeviceId, Vec<String>> = ctx
        .config
        .devices
        .iter()
        .map(|d| (d.id.clone(), plan.reset_lines(&d.id)))
        .collect();
    let work = inventory_work(ctx);
    let ids: Vec<DeviceId> = work.iter().map(|(id, _)| id.clone()).collect();

    let completed = dispatch(work, ctx.max_workers(), move |(device, session)| {
        let lines = lines.get(&device).cloned().unwrap_or_default();
        async move {
            let session = match session {
                Ok(session) => session,
                Err(reason) => return ResetResult::failed(device, reason),
            };
            let session = session.lock().await;
            info!(device = %device, lines = lines.len(), "Removing OSPF configuration");
            if let Err(e) = session.configure(&lines).await {
                return ResetResult::failed(device, e.to_string());
            }
            match show::<OspfProcessStatus>(&**session).await {
                Ok(status) => ResetResult {
                    device,
                    ospf_running: Some(status.running),
                    error: None,
                },
                Err(e) => ResetResult::failed(device, e.to_string()),
            }
        }
    })
    .await;

    let mut results: Vec<ResetResult> = completed
        .into_iter()
        .map(|done| match done.result {
            Ok(result) => result,
            Err(panic) => ResetResult::failed(ids[done.index].clone(), panic.to_string()),
        })
        .collect();
    results.sort_by(|a, b| a.device.cmp(&b.device));
    results
}

pub async fn run(ctx: &LabContext, plan: &AddressPlan) -> Result<CommandOutcome> {
    let results = reset_all(ctx, plan).await;
    for result in &results {
        match (&result.error, result.ospf_running) {
            (Some(e), _) => {
                error!(device = %result.device, error = %e, "Reset failed");
                println!("{} - Error: {e}", result.device);
            }
            (None, Some(true)) => {
                error!(device = %result.device, "OSPF still running after reset");
                println!("{} - OSPF still running", result.device);
            }
            _ => println!("{} - OSPF removed", result.device),
        }
    }
    Ok(CommandOutcome {
        success: results.iter().all(ResetResult::passed),
        run_dir: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passed_requires_confirmed_removal() {
        let mut result = ResetResult {
            device: DeviceId::new("R1"),
            ospf_running: Some(false),
            error: None,
        };
        assert!(result.passed());
        result.ospf_running = Some(true);
        assert!(!result.passed());
        assert!(!ResetResult::failed(DeviceId::new("R2"), "timeout".into()).passed());
    }
}
