//! OSPF state export.
//!
//! Collects neighbors, OSPF interfaces, IP interfaces, OSPF routes and the
//! Loopback0 address from every device. A section that cannot be read or
//! parsed becomes a warning on that device; the remaining sections are still
//! exported.

use super::{CommandOutcome, inventory_work};
use crate::context::LabContext;
use crate::dispatch::dispatch;
use crate::output::{create_run_dir, write_json};
use anyhow::Result;
use chrono::{DateTime, Local};
use olab_common::{
    CliRecord, DeviceId, DeviceSession, InterfaceTable, LoopbackAddress, NeighborSnapshot,
    OspfInterfaceTable, OspfRouteTable, neighbors, show,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use tracing::{info, warn};

pub const EXPORT_FILE: &str = "ospf_complete_export.json";
pub const TOPOLOGY_FILE: &str = "network_topology.json";
pub const SUMMARY_FILE: &str = "export_summary.json";

#[derive(Debug, Clone, Serialize)]
pub struct DeviceExport {
    pub name: DeviceId,
    pub management_ip: String,
    pub ospf_neighbors: Option<NeighborSnapshot>,
    pub ospf_interfaces: Option<OspfInterfaceTable>,
    pub ip_interfaces: Option<InterfaceTable>,
    pub ospf_routes: Option<OspfRouteTable>,
    pub loopback: Option<Ipv4Addr>,
    /// Set when the device could not be reached at all.
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl DeviceExport {
    fn new(name: DeviceId, management_ip: String) -> Self {
        Self {
            name,
            management_ip,
            ospf_neighbors: None,
            ospf_interfaces: None,
            ip_interfaces: None,
            ospf_routes: None,
            loopback: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn neighbor_count(&self) -> usize {
        self.ospf_neighbors.as_ref().map_or(0, NeighborSnapshot::len)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabExport {
    pub export_timestamp: DateTime<Local>,
    pub device_count: usize,
    pub devices: BTreeMap<DeviceId, DeviceExport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyNode {
    pub id: DeviceId,
    pub label: String,
    pub loopback: Option<Ipv4Addr>,
    pub management_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyLink {
    pub source: String,
    pub target: String,
    pub interface: String,
    pub neighbor_address: Ipv4Addr,
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryEntry {
    pub loopback: Option<Ipv4Addr>,
    pub management_ip: String,
    pub ospf_neighbors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub timestamp: DateTime<Local>,
    pub device_count: usize,
    pub devices: BTreeMap<DeviceId, SummaryEntry>,
}

async fn section<R: CliRecord>(
    session: &dyn DeviceSession,
    name: &str,
    warnings: &mut Vec<String>,
) -> Option<R> {
    match show::<R>(session).await {
        Ok(record) => Some(record),
        Err(e) => {
            warnings.push(format!("{name}: {e}"));
            None
        }
    }
}

/// Collect every section from every inventory device.
pub async fn collect(ctx: &LabContext) -> LabExport {
    let hosts: HashMap<DeviceId, String> = ctx
        .config
        .devices
        .iter()
        .map(|d| (d.id.clone(), d.host.clone()))
        .collect();
    let work = inventory_work(ctx);
    let ids: Vec<DeviceId> = work.iter().map(|(id, _)| id.clone()).collect();

    let lookup = hosts.clone();
    let completed = dispatch(work, ctx.max_workers(), move |(device, session)| {
        let host = lookup.get(&device).cloned().unwrap_or_default();
        async move {
            let mut export = DeviceExport::new(device, host);
            let session = match session {
                Ok(session) => session,
                Err(reason) => {
                    export.error = Some(reason);
                    return export;
                }
            };
            let session = session.lock().await;
            let warnings = &mut export.warnings;
            export.ospf_neighbors = match neighbors(&**session).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warnings.push(format!("ospf_neighbors: {e}"));
                    None
                }
            };
            export.ospf_interfaces = section(&**session, "ospf_interfaces", warnings).await;
            export.ip_interfaces = section(&**session, "ip_interfaces", warnings).await;
            export.ospf_routes = section(&**session, "ospf_routes", warnings).await;
            export.loopback = section::<LoopbackAddress>(&**session, "loopback", warnings)
                .await
                .map(|l| l.0);
            export
        }
    })
    .await;

    let mut devices = BTreeMap::new();
    for done in completed {
        let export = match done.result {
            Ok(export) => export,
            Err(panic) => {
                let device = ids[done.index].clone();
                let host = hosts.get(&device).cloned().unwrap_or_default();
                let mut export = DeviceExport::new(device, host);
                export.error = Some(panic.to_string());
                export
            }
        };
        if let Some(e) = &export.error {
            warn!(device = %export.name, error = %e, "Export failed");
        } else if export.warnings.is_empty() {
            info!(
                device = %export.name,
                neighbors = export.neighbor_count(),
                loopback = ?export.loopback,
                "Collected"
            );
        } else {
            for w in &export.warnings {
                warn!(device = %export.name, warning = %w, "Collected with warnings");
            }
        }
        devices.insert(export.name.clone(), export);
    }

    LabExport {
        export_timestamp: Local::now(),
        device_count: ctx.config.devices.len(),
        devices,
    }
}

impl LabExport {
    /// Nodes for every device, and one link per unordered router pair.
    ///
    /// Neighbor router IDs are resolved to device names through the
    /// exported loopbacks; unresolved IDs are kept as-is.
    pub fn topology(&self) -> Topology {
        let by_loopback: HashMap<Ipv4Addr, &DeviceId> = self
            .devices
            .values()
            .filter_map(|d| d.loopback.map(|lo| (lo, &d.name)))
            .collect();

        let mut topology = Topology::default();
        let mut seen = BTreeSet::new();
        for device in self.devices.values() {
            topology.nodes.push(TopologyNode {
                id: device.name.clone(),
                label: device.name.to_string(),
                loopback: device.loopback,
                management_ip: device.management_ip.clone(),
            });
            let Some(neighbors) = &device.ospf_neighbors else {
                continue;
            };
            for n in &neighbors.neighbors {
                let target = by_loopback
                    .get(&n.router_id)
                    .map_or_else(|| n.router_id.to_string(), |d| d.to_string());
                let source = device.name.to_string();
                let key = if source <= target {
                    (source.clone(), target.clone())
                } else {
                    (target.clone(), source.clone())
                };
                if !seen.insert(key) {
                    continue;
                }
                topology.links.push(TopologyLink {
                    source,
                    target,
                    interface: n.interface.clone(),
                    neighbor_address: n.address,
                    state: n.state.to_string(),
                });
            }
        }
        topology
    }

    pub fn summary(&self) -> ExportSummary {
        ExportSummary {
            timestamp: self.export_timestamp,
            device_count: self.device_count,
            devices: self
                .devices
                .iter()
                .map(|(id, d)| {
                    (
                        id.clone(),
                        SummaryEntry {
                            loopback: d.loopback,
                            management_ip: d.management_ip.clone(),
                            ospf_neighbors: d.neighbor_count(),
                            warnings: d.warnings.len(),
                        },
                    )
                })
                .collect(),
        }
    }
}

pub async fn run(ctx: &LabContext) -> Result<CommandOutcome> {
    let export = collect(ctx).await;
    let topology = export.topology();
    let summary = export.summary();

    let run_dir = create_run_dir(&ctx.config.lab.results_dir, "ospf_export", Local::now())?;
    write_json(&run_dir.join(EXPORT_FILE), &export)?;
    write_json(&run_dir.join(TOPOLOGY_FILE), &topology)?;
    write_json(&run_dir.join(SUMMARY_FILE), &summary)?;

    info!(
        nodes = topology.nodes.len(),
        links = topology.links.len(),
        dir = %run_dir.display(),
        "Export written"
    );
    for (id, entry) in &summary.devices {
        let loopback = entry
            .loopback
            .map_or_else(|| "unknown".to_string(), |lo| lo.to_string());
        println!(
            "{id}: loopback {loopback}, management {}, {} OSPF neighbors",
            entry.management_ip, entry.ospf_neighbors
        );
    }

    Ok(CommandOutcome {
        success: export.devices.values().all(|d| d.error.is_none()),
        run_dir: Some(run_dir),
    })
}
