//! Offline view of the /31 address plan.

use anyhow::Result;
use olab_common::AddressPlan;
use std::fmt::Write as _;

/// The plan as a table followed by each device's command set.
pub fn render(plan: &AddressPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "OSPF process {} area {}", plan.process_id, plan.area);
    let _ = writeln!(out, "\nLinks:");
    for link in &plan.links {
        let [a, b] = &link.endpoints;
        let _ = writeln!(
            out,
            "  {:<12} {:<16} {} {} {} <-> {} {} {}",
            link.name, link.subnet, a.device, a.interface, a.address, b.device, b.interface,
            b.address
        );
    }
    let _ = writeln!(out, "\nLoopbacks:");
    for (device, loopback) in &plan.loopbacks {
        let _ = writeln!(out, "  {device} Loopback0 {loopback}/32");
    }
    for device in plan.devices() {
        let _ = writeln!(out, "\n! {device}");
        for line in plan.deploy_lines(device) {
            let _ = writeln!(out, "{line}");
        }
    }
    out
}

pub fn run(plan: &AddressPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else {
        print!("{}", render(plan));
    }
    Ok(())
}
