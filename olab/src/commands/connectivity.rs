//! Management interface addressing check.

use super::{CommandOutcome, inventory_work};
use crate::context::LabContext;
use crate::dispatch::dispatch;
use crate::output::{create_run_dir, write_text};
use anyhow::Result;
use chrono::Local;
use olab_common::parse::LinkStatus;
use olab_common::{DeviceId, InterfaceTable, show};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use tracing::{error, info};

pub const REPORT_FILE: &str = "interface_report.txt";

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceCheck {
    pub device: DeviceId,
    pub interface: String,
    pub address: Option<Ipv4Addr>,
    pub status: Option<LinkStatus>,
    pub error: Option<String>,
}

impl InterfaceCheck {
    fn failed(device: DeviceId, interface: String, error: String) -> Self {
        Self {
            device,
            interface,
            address: None,
            status: None,
            error: Some(error),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.address.is_some()
    }

    fn line(&self) -> String {
        match (&self.error, self.address) {
            (Some(e), _) => format!("{} - Error: {e}", self.device),
            (None, Some(ip)) => format!("{} - {} IP is {ip}", self.device, self.interface),
            (None, None) => format!("{} - {} has no IP", self.device, self.interface),
        }
    }
}

/// Check the management interface of every inventory device.
pub async fn check_all(ctx: &LabContext) -> Vec<InterfaceCheck> {
    let interfaces: HashMap<DeviceId, String> = ctx
        .config
        .devices
        .iter()
        .map(|d| (d.id.clone(), d.management_interface.clone()))
        .collect();
    let work = inventory_work(ctx);
    let ids: Vec<DeviceId> = work.iter().map(|(id, _)| id.clone()).collect();

    let lookup = interfaces.clone();
    let completed = dispatch(work, ctx.max_workers(), move |(device, session)| {
        let interface = lookup.get(&device).cloned().unwrap_or_default();
        async move {
            let session = match session {
                Ok(session) => session,
                Err(reason) => return InterfaceCheck::failed(device, interface, reason),
            };
            let session = session.lock().await;
            match show::<InterfaceTable>(&**session).await {
                Ok(table) => match table.get(&interface) {
                    Some(record) => InterfaceCheck {
                        device,
                        interface,
                        address: record.ip_address,
                        status: Some(record.status),
                        error: None,
                    },
                    None => {
                        let error = format!("{interface} not present");
                        InterfaceCheck::failed(device, interface, error)
                    }
                },
                Err(e) => InterfaceCheck::failed(device, interface, e.to_string()),
            }
        }
    })
    .await;

    let mut checks: Vec<InterfaceCheck> = completed
        .into_iter()
        .map(|done| match done.result {
            Ok(check) => check,
            Err(panic) => {
                let device = ids[done.index].clone();
                let interface = interfaces.get(&device).cloned().unwrap_or_default();
                InterfaceCheck::failed(device, interface, panic.to_string())
            }
        })
        .collect();
    checks.sort_by(|a, b| a.device.cmp(&b.device));
    checks
}

pub fn render_report(checks: &[InterfaceCheck]) -> String {
    let mut out = String::from("Interface IP Check Report\n");
    let _ = writeln!(out, "{}\n", "=".repeat(40));
    for check in checks {
        let _ = writeln!(out, "{}", check.line());
    }
    out
}

pub async fn run(ctx: &LabContext) -> Result<CommandOutcome> {
    let checks = check_all(ctx).await;
    for check in &checks {
        if check.passed() {
            info!(
                device = %check.device,
                interface = %check.interface,
                address = ?check.address,
                "Management address present"
            );
        } else {
            error!(device = %check.device, line = %check.line(), "Management check failed");
        }
        println!("{}", check.line());
    }

    let run_dir = create_run_dir(&ctx.config.lab.results_dir, "connectivity", Local::now())?;
    write_text(&run_dir.join(REPORT_FILE), &render_report(&checks))?;

    Ok(CommandOutcome {
        success: checks.iter().all(InterfaceCheck::passed),
        run_dir: Some(run_dir),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lines() {
        let checks = vec![
            InterfaceCheck {
                device: DeviceId::new("R1"),
                interface: "GigabitEthernet0/0".into(),
                address: Some(Ipv4Addr::new(192, 168, 1, 11)),
                status: Some(LinkStatus::Up),
                error: None,
            },
            InterfaceCheck {
                device: DeviceId::new("R2"),
                interface: "GigabitEthernet0/0".into(),
                address: None,
                status: Some(LinkStatus::Up),
                error: None,
            },
            InterfaceCheck::failed(
                DeviceId::new("R3"),
                "GigabitEthernet0/0".into(),
                "connection refused".into(),
            ),
        ];
        let report = render_report(&checks);
        assert!(report.starts_with("Interface IP Check Report\n"));
        assert!(report.contains("R1 - GigabitEthernet0/0 IP is 192.168.1.11"));
        assert!(report.contains("R2 - GigabitEthernet0/0 has no IP"));
        assert!(report.contains("R3 - Error: connection refused"));
        assert!(checks[0].passed());
        assert!(!checks[1].passed());
    }
}
