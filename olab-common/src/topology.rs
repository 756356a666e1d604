//! /31 address planning and per-device OSPF command sets.
//!
//! Links are numbered in declaration order: link `n` gets the `n`th /31 of
//! the pool, its first endpoint the even address and its second endpoint the
//! odd one.

use crate::config::OspfPlanConfig;
use crate::errors::PlanError;
use crate::types::{DeviceConfig, DeviceId, canonical_interface_name};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::Ipv4Addr;

/// One addressed interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAssignment {
    pub device: DeviceId,
    pub interface: String,
    pub address: Ipv4Addr,
}

/// A link with its /31 subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkAssignment {
    pub name: String,
    pub subnet: Ipv4Net,
    pub endpoints: [InterfaceAssignment; 2],
}

/// The full fabric plan.
#[derive(Debug, Clone, Serialize)]
pub struct AddressPlan {
    pub process_id: u32,
    pub area: u32,
    pub links: Vec<LinkAssignment>,
    pub loopbacks: BTreeMap<DeviceId, Ipv4Addr>,
}

impl AddressPlan {
    /// Assign /31 subnets to the configured links.
    ///
    /// Every link endpoint must name an inventory device that has a loopback.
    pub fn build(plan: &OspfPlanConfig, devices: &[DeviceConfig]) -> Result<Self, PlanError> {
        let pool = plan.link_pool.trunc();
        let subnets = pool.subnets(31).map_err(|_| PlanError::PoolPrefix {
            pool: pool.to_string(),
        })?;

        let available = if pool.prefix_len() > 31 {
            0
        } else {
            1usize << (31 - pool.prefix_len())
        };
        if available < plan.links.len() {
            return Err(PlanError::PoolExhausted {
                pool: pool.to_string(),
                available,
                needed: plan.links.len(),
            });
        }

        let known: HashSet<&DeviceId> = devices.iter().map(|d| &d.id).collect();
        let mut used = HashSet::new();
        let mut links = Vec::with_capacity(plan.links.len());

        for (link, subnet) in plan.links.iter().zip(subnets) {
            for endpoint in &link.endpoints {
                if !known.contains(&endpoint.device) {
                    return Err(PlanError::UnknownDevice {
                        link: link.name.clone(),
                        device: endpoint.device.to_string(),
                    });
                }
                if !plan.loopbacks.contains_key(&endpoint.device) {
                    return Err(PlanError::MissingLoopback {
                        device: endpoint.device.to_string(),
                    });
                }
                let interface = canonical_interface_name(&endpoint.interface);
                if !used.insert((endpoint.device.clone(), interface.clone())) {
                    return Err(PlanError::DuplicateEndpoint {
                        device: endpoint.device.to_string(),
                        interface,
                    });
                }
            }

            let even = subnet.network();
            let odd = Ipv4Addr::from(u32::from(even) + 1);
            let [a, b] = &link.endpoints;
            links.push(LinkAssignment {
                name: link.name.clone(),
                subnet,
                endpoints: [
                    InterfaceAssignment {
                        device: a.device.clone(),
                        interface: canonical_interface_name(&a.interface),
                        address: even,
                    },
                    InterfaceAssignment {
                        device: b.device.clone(),
                        interface: canonical_interface_name(&b.interface),
                        address: odd,
                    },
                ],
            });
        }

        let loopbacks = plan
            .loopbacks
            .iter()
            .filter(|(device, _)| known.contains(device))
            .map(|(device, ip)| (device.clone(), *ip))
            .collect();

        Ok(Self {
            process_id: plan.process_id,
            area: plan.area,
            links,
            loopbacks,
        })
    }

    /// Devices that take part in the fabric.
    pub fn devices(&self) -> BTreeSet<&DeviceId> {
        self.links
            .iter()
            .flat_map(|l| l.endpoints.iter().map(|e| &e.device))
            .chain(self.loopbacks.keys())
            .collect()
    }

    /// Link interfaces on `device`, paired with the link they belong to.
    pub fn interfaces_for<'a>(
        &'a self,
        device: &'a DeviceId,
    ) -> impl Iterator<Item = (&'a LinkAssignment, &'a InterfaceAssignment)> + 'a {
        self.links.iter().flat_map(move |link| {
            link.endpoints
                .iter()
                .filter(move |e| &e.device == device)
                .map(move |e| (link, e))
        })
    }

    /// The far end of `device`'s interface on a link.
    pub fn peer_of(&self, device: &DeviceId, interface: &str) -> Option<&InterfaceAssignment> {
        let interface = canonical_interface_name(interface);
        self.links.iter().find_map(|link| {
            let [a, b] = &link.endpoints;
            if &a.device == device && a.interface == interface {
                Some(b)
            } else if &b.device == device && b.interface == interface {
                Some(a)
            } else {
                None
            }
        })
    }

    /// Configuration lines that bring `device` into the fabric.
    pub fn deploy_lines(&self, device: &DeviceId) -> Vec<String> {
        let (pid, area) = (self.process_id, self.area);
        let mut lines = Vec::new();

        if let Some(loopback) = self.loopbacks.get(device) {
            lines.push("interface Loopback0".to_string());
            lines.push(format!(" ip address {loopback} 255.255.255.255"));
            lines.push(format!(" ip ospf {pid} area {area}"));
        }

        for (link, endpoint) in self.interfaces_for(device) {
            lines.push(format!("interface {}", endpoint.interface));
            lines.push(format!(" description {} - OSPF area {area}", link.name));
            lines.push(format!(
                " ip address {} {}",
                endpoint.address,
                link.subnet.netmask()
            ));
            lines.push(" ip ospf network point-to-point".to_string());
            lines.push(format!(" ip ospf {pid} area {area}"));
            lines.push(" no shutdown".to_string());
        }

        lines.push(format!("router ospf {pid}"));
        if let Some(loopback) = self.loopbacks.get(device) {
            lines.push(format!(" router-id {loopback}"));
        }
        lines
    }

    /// Configuration lines that remove everything [`Self::deploy_lines`] adds.
    pub fn reset_lines(&self, device: &DeviceId) -> Vec<String> {
        let mut lines = vec![format!("no router ospf {}", self.process_id)];
        for (_, endpoint) in self.interfaces_for(device) {
            lines.push(format!("interface {}", endpoint.interface));
            lines.push(" no ip ospf network point-to-point".to_string());
            lines.push(" no ip address".to_string());
            lines.push(" shutdown".to_string());
        }
        lines.push("no interface Loopback0".to_string());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, LinkConfig};

    fn inventory(names: &[&str]) -> Vec<DeviceConfig> {
        names
            .iter()
            .map(|name| DeviceConfig {
                id: DeviceId::new(*name),
                host: format!("{name}.lab"),
                port: 22,
                user: "cisco".into(),
                identity_file: "~/.ssh/lab".into(),
                management_interface: "GigabitEthernet0/0".into(),
            })
            .collect()
    }

    fn square() -> Vec<DeviceConfig> {
        inventory(&["R1", "R2", "R3", "R4"])
    }

    #[test]
    fn test_default_plan_addresses() {
        let plan = AddressPlan::build(&OspfPlanConfig::default(), &square()).unwrap();
        assert_eq!(plan.links.len(), 4);

        let first = &plan.links[0];
        assert_eq!(first.name, "R1_R2_G0_1");
        assert_eq!(first.subnet.to_string(), "10.0.0.0/31");
        assert_eq!(first.endpoints[0].address, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(first.endpoints[1].address, Ipv4Addr::new(10, 0, 0, 1));

        let last = &plan.links[3];
        assert_eq!(last.subnet.to_string(), "10.0.0.6/31");
        assert_eq!(last.endpoints[0].device, DeviceId::new("R3"));
        assert_eq!(last.endpoints[1].address, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(plan.devices().len(), 4);
    }

    #[test]
    fn test_peer_of() {
        let plan = AddressPlan::build(&OspfPlanConfig::default(), &square()).unwrap();
        let peer = plan.peer_of(&DeviceId::new("R1"), "Gi0/2").unwrap();
        assert_eq!(peer.device, DeviceId::new("R4"));
        assert_eq!(peer.address, Ipv4Addr::new(10, 0, 0, 3));
        assert!(plan.peer_of(&DeviceId::new("R1"), "Gi0/3").is_none());
    }

    #[test]
    fn test_deploy_lines_for_r1() {
        let plan = AddressPlan::build(&OspfPlanConfig::default(), &square()).unwrap();
        let lines = plan.deploy_lines(&DeviceId::new("R1"));
        assert_eq!(lines[0], "interface Loopback0");
        assert_eq!(lines[1], " ip address 1.1.1.1 255.255.255.255");
        assert!(lines.contains(&"interface GigabitEthernet0/1".to_string()));
        assert!(lines.contains(&" ip address 10.0.0.0 255.255.255.254".to_string()));
        assert!(lines.contains(&" ip address 10.0.0.2 255.255.255.254".to_string()));
        assert_eq!(
            lines
                .iter()
                .filter(|l| *l == " ip ospf network point-to-point")
                .count(),
            2
        );
        assert_eq!(lines[lines.len() - 2], "router ospf 10");
        assert_eq!(lines[lines.len() - 1], " router-id 1.1.1.1");
    }

    #[test]
    fn test_reset_lines_for_r3() {
        let plan = AddressPlan::build(&OspfPlanConfig::default(), &square()).unwrap();
        let lines = plan.reset_lines(&DeviceId::new("R3"));
        assert_eq!(lines.first().unwrap(), "no router ospf 10");
        assert_eq!(lines.last().unwrap(), "no interface Loopback0");
        assert_eq!(lines.iter().filter(|l| *l == " shutdown").count(), 2);
    }

    #[test]
    fn test_pool_too_small() {
        let config = OspfPlanConfig {
            link_pool: "10.0.0.0/30".parse().unwrap(),
            ..OspfPlanConfig::default()
        };
        let err = AddressPlan::build(&config, &square()).unwrap_err();
        assert_eq!(
            err,
            PlanError::PoolExhausted {
                pool: "10.0.0.0/30".into(),
                available: 2,
                needed: 4
            }
        );
    }

    #[test]
    fn test_host_pool_rejected() {
        let config = OspfPlanConfig {
            link_pool: "10.0.0.1/32".parse().unwrap(),
            ..OspfPlanConfig::default()
        };
        assert!(matches!(
            AddressPlan::build(&config, &square()),
            Err(PlanError::PoolPrefix { .. })
        ));
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut config = OspfPlanConfig::default();
        config.links.push(LinkConfig {
            name: "R1_R3_G0_1".into(),
            endpoints: [
                Endpoint::new("R1", "Gi0/1"),
                Endpoint::new("R3", "GigabitEthernet0/3"),
            ],
        });
        let err = AddressPlan::build(&config, &square()).unwrap_err();
        assert_eq!(
            err,
            PlanError::DuplicateEndpoint {
                device: "R1".into(),
                interface: "GigabitEthernet0/1".into()
            }
        );
    }

    #[test]
    fn test_unknown_device_rejected() {
        let err = AddressPlan::build(&OspfPlanConfig::default(), &inventory(&["R1", "R2"]))
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownDevice { .. }));
    }

    #[test]
    fn test_unaligned_pool_is_truncated() {
        let config = OspfPlanConfig {
            link_pool: "10.1.0.9/24".parse().unwrap(),
            ..OspfPlanConfig::default()
        };
        let plan = AddressPlan::build(&config, &square()).unwrap();
        assert_eq!(plan.links[0].subnet.to_string(), "10.1.0.0/31");
    }
}
