//! Typed parsers for IOS show-command output.
//!
//! Each record type declares the command that produces it, so callers go
//! through [`crate::session::show`] and never touch raw text. Rows that fail
//! to match are a [`ParseError`], not silently skipped.

use crate::errors::ParseError;
use crate::types::{AdjacencyState, NeighborRecord, NeighborSnapshot, canonical_interface_name};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::OnceLock;

/// A structured record produced from one show command.
pub trait CliRecord: Sized {
    /// Command text sent to the device.
    const COMMAND: &'static str;

    fn parse(raw: &str) -> Result<Self, ParseError>;
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex is valid"))
}

/// Split raw output into the non-blank lines after the header row.
///
/// Some images echo the prompt or a banner before the header, so the header
/// may appear anywhere.
fn body_after_header<'a>(
    raw: &'a str,
    command: &'static str,
    header_starts: &str,
) -> Result<Vec<&'a str>, ParseError> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.is_empty() {
        return Err(ParseError::Empty { command });
    }

    let header = lines
        .iter()
        .position(|line| line.trim_start().starts_with(header_starts))
        .ok_or(ParseError::MissingHeader { command })?;
    Ok(lines[header + 1..].to_vec())
}

impl CliRecord for NeighborSnapshot {
    const COMMAND: &'static str = "show ip ospf neighbor";

    fn parse(raw: &str) -> Result<Self, ParseError> {
        static ROW: OnceLock<Regex> = OnceLock::new();
        let row = regex(
            &ROW,
            r"^\s*(?P<id>\d+\.\d+\.\d+\.\d+)\s+(?P<pri>\d+)\s+(?P<state>[A-Za-z0-9]+/\s*\S+|[A-Za-z0-9]+)\s+(?P<dead>\d+:\d+:\d+|-)\s+(?P<addr>\d+\.\d+\.\d+\.\d+)\s+(?P<intf>\S+)\s*$",
        );

        let body = body_after_header(raw, Self::COMMAND, "Neighbor ID")?;
        let mut neighbors = Vec::with_capacity(body.len());
        for line in body {
            let caps = row.captures(line).ok_or_else(|| ParseError::Malformed {
                command: Self::COMMAND,
                line: line.to_string(),
            })?;
            let state = AdjacencyState::from_ios(&caps["state"]).ok_or_else(|| {
                ParseError::Malformed {
                    command: Self::COMMAND,
                    line: line.to_string(),
                }
            })?;
            neighbors.push(NeighborRecord {
                router_id: parse_ip(&caps["id"], Self::COMMAND, "neighbor_id")?,
                interface: canonical_interface_name(&caps["intf"]),
                state,
                address: parse_ip(&caps["addr"], Self::COMMAND, "address")?,
                priority: caps["pri"].parse().map_err(|_| ParseError::MissingField {
                    command: Self::COMMAND,
                    field: "priority",
                })?,
            });
        }
        Ok(NeighborSnapshot::new(neighbors))
    }
}

fn parse_ip(raw: &str, command: &'static str, field: &'static str) -> Result<Ipv4Addr, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::MissingField { command, field })
}

/// Line/protocol status reported by `show ip interface brief`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Up,
    Down,
    AdministrativelyDown,
}

impl LinkStatus {
    fn from_ios(raw: &str) -> Option<Self> {
        match raw {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "administratively down" => Some(Self::AdministrativelyDown),
            _ => None,
        }
    }
}

/// One row of `show ip interface brief`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub interface: String,
    /// `None` when the interface reports "unassigned".
    pub ip_address: Option<Ipv4Addr>,
    pub status: LinkStatus,
    pub protocol_up: bool,
}

impl InterfaceRecord {
    pub fn is_admin_up(&self) -> bool {
        self.status != LinkStatus::AdministrativelyDown
    }
}

/// Parsed `show ip interface brief`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceTable {
    pub interfaces: Vec<InterfaceRecord>,
}

impl InterfaceTable {
    pub fn get(&self, name: &str) -> Option<&InterfaceRecord> {
        let wanted = canonical_interface_name(name);
        self.interfaces.iter().find(|i| i.interface == wanted)
    }
}

impl CliRecord for InterfaceTable {
    const COMMAND: &'static str = "show ip interface brief";

    fn parse(raw: &str) -> Result<Self, ParseError> {
        static ROW: OnceLock<Regex> = OnceLock::new();
        let row = regex(
            &ROW,
            r"^(?P<intf>\S+)\s+(?P<ip>\d+\.\d+\.\d+\.\d+|unassigned)\s+(?:YES|NO)\s+\S+\s+(?P<status>administratively down|up|down|deleted)\s+(?P<proto>up|down)\s*$",
        );

        let body = body_after_header(raw, Self::COMMAND, "Interface")?;
        let mut interfaces = Vec::with_capacity(body.len());
        for line in body {
            let caps = row.captures(line).ok_or_else(|| ParseError::Malformed {
                command: Self::COMMAND,
                line: line.to_string(),
            })?;
            // Deleted subinterfaces linger in the table on some images.
            let Some(status) = LinkStatus::from_ios(&caps["status"]) else {
                continue;
            };
            let ip_address = match &caps["ip"] {
                "unassigned" => None,
                ip => Some(parse_ip(ip, Self::COMMAND, "ip_address")?),
            };
            interfaces.push(InterfaceRecord {
                interface: canonical_interface_name(&caps["intf"]),
                ip_address,
                status,
                protocol_up: &caps["proto"] == "up",
            });
        }
        Ok(Self { interfaces })
    }
}

/// One row of `show ip ospf interface brief`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfInterfaceRecord {
    pub interface: String,
    pub process_id: u32,
    pub area: String,
    /// Address with prefix length, e.g. "10.0.0.0/31".
    pub address: String,
    pub cost: u32,
    /// Interface state ("P2P", "LOOP", "DR", "BDR", "DROTH", "DOWN").
    pub state: String,
    pub neighbors_full: u32,
    pub neighbors_configured: u32,
}

impl OspfInterfaceRecord {
    pub fn is_loopback(&self) -> bool {
        self.interface.starts_with("Loopback") || self.state == "LOOP"
    }

    pub fn is_point_to_point(&self) -> bool {
        let state = self.state.to_ascii_uppercase();
        state == "P2P" || state.contains("POINT")
    }
}

/// Parsed `show ip ospf interface brief`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OspfInterfaceTable {
    pub interfaces: Vec<OspfInterfaceRecord>,
}

impl CliRecord for OspfInterfaceTable {
    const COMMAND: &'static str = "show ip ospf interface brief";

    fn parse(raw: &str) -> Result<Self, ParseError> {
        static ROW: OnceLock<Regex> = OnceLock::new();
        let row = regex(
            &ROW,
            r"^(?P<intf>\S+)\s+(?P<pid>\d+)\s+(?P<area>\S+)\s+(?P<addr>\d+\.\d+\.\d+\.\d+/\d+)\s+(?P<cost>\d+)\s+(?P<state>\S+)\s+(?P<full>\d+)/(?P<cfg>\d+)\s*$",
        );

        let body = body_after_header(raw, Self::COMMAND, "Interface")?;
        let mut interfaces = Vec::with_capacity(body.len());
        for line in body {
            let caps = row.captures(line).ok_or_else(|| ParseError::Malformed {
                command: Self::COMMAND,
                line: line.to_string(),
            })?;
            let number = |field: &'static str, name: &str| -> Result<u32, ParseError> {
                caps[name].parse().map_err(|_| ParseError::MissingField {
                    command: Self::COMMAND,
                    field,
                })
            };
            interfaces.push(OspfInterfaceRecord {
                interface: canonical_interface_name(&caps["intf"]),
                process_id: number("process_id", "pid")?,
                area: caps["area"].to_string(),
                address: caps["addr"].to_string(),
                cost: number("cost", "cost")?,
                state: caps["state"].to_string(),
                neighbors_full: number("neighbors_full", "full")?,
                neighbors_configured: number("neighbors_configured", "cfg")?,
            });
        }
        Ok(Self { interfaces })
    }
}

/// One next hop of an OSPF route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePath {
    pub next_hop: Ipv4Addr,
    pub age: String,
    pub interface: String,
}

/// One OSPF route from `show ip route ospf`.
///
/// Equal-cost routes carry one path per next hop, in the order IOS lists
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfRoute {
    /// Route code ("O", "O IA", "O E2", ...).
    pub code: String,
    pub prefix: String,
    pub admin_distance: u32,
    pub metric: u32,
    pub paths: Vec<RoutePath>,
}

/// Parsed `show ip route ospf`.
///
/// An empty route table is valid output; only the legend and the
/// "Gateway of last resort" line surround the routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OspfRouteTable {
    pub routes: Vec<OspfRoute>,
}

/// Lines after the `Codes:` legend.
///
/// The legend wraps over several lines, some starting with route codes, so
/// everything up to the "Gateway of last resort" line is dropped. Without
/// that line the legend ends at the first blank line.
fn route_body(raw: &str) -> Vec<&str> {
    let lines: Vec<&str> = raw.lines().map(str::trim).collect();
    if let Some(gateway) = lines
        .iter()
        .position(|line| line.starts_with("Gateway of last resort"))
    {
        return lines[gateway + 1..].to_vec();
    }
    match lines.iter().position(|line| line.starts_with("Codes:")) {
        Some(codes) => lines[codes..]
            .iter()
            .skip_while(|line| !line.is_empty())
            .copied()
            .collect(),
        None => lines,
    }
}

impl OspfRouteTable {
    fn path(line: &str) -> Result<(u32, u32, RoutePath), ParseError> {
        static PATH: OnceLock<Regex> = OnceLock::new();
        let pattern = regex(
            &PATH,
            r"^\[(?P<ad>\d+)/(?P<metric>\d+)\]\s+via\s+(?P<nh>\d+\.\d+\.\d+\.\d+),\s*(?P<age>[^,]+),\s*(?P<intf>\S+)\s*$",
        );
        let malformed = || ParseError::Malformed {
            command: Self::COMMAND,
            line: line.to_string(),
        };
        let caps = pattern.captures(line).ok_or_else(malformed)?;
        let number = |field: &'static str, name: &str| -> Result<u32, ParseError> {
            caps[name].parse().map_err(|_| ParseError::MissingField {
                command: Self::COMMAND,
                field,
            })
        };
        Ok((
            number("admin_distance", "ad")?,
            number("metric", "metric")?,
            RoutePath {
                next_hop: parse_ip(&caps["nh"], Self::COMMAND, "next_hop")?,
                age: caps["age"].trim().to_string(),
                interface: canonical_interface_name(&caps["intf"]),
            },
        ))
    }
}

impl CliRecord for OspfRouteTable {
    const COMMAND: &'static str = "show ip route ospf";

    fn parse(raw: &str) -> Result<Self, ParseError> {
        static HEAD: OnceLock<Regex> = OnceLock::new();
        let head = regex(
            &HEAD,
            r"^(?P<code>O\*?(?:\s*(?:IA|E1|E2|N1|N2))?)\s+(?P<prefix>\d+\.\d+\.\d+\.\d+(?:/\d+)?)(?:\s+(?P<path>\[.*))?$",
        );

        if raw.trim().is_empty() {
            return Err(ParseError::Empty {
                command: Self::COMMAND,
            });
        }

        let mut routes: Vec<OspfRoute> = Vec::new();
        // A long prefix pushes its first path onto the next line.
        let mut pending: Option<(String, String)> = None;
        for line in route_body(raw) {
            let malformed = || ParseError::Malformed {
                command: Self::COMMAND,
                line: line.to_string(),
            };
            if let Some(caps) = head.captures(line) {
                if pending.is_some() {
                    return Err(malformed());
                }
                let code = caps["code"].split_whitespace().collect::<Vec<_>>().join(" ");
                let prefix = caps["prefix"].to_string();
                match caps.name("path") {
                    Some(path) => {
                        let (admin_distance, metric, path) = Self::path(path.as_str())?;
                        routes.push(OspfRoute {
                            code,
                            prefix,
                            admin_distance,
                            metric,
                            paths: vec![path],
                        });
                    }
                    None => pending = Some((code, prefix)),
                }
            } else if line.starts_with('[') {
                let (admin_distance, metric, path) = Self::path(line)?;
                match pending.take() {
                    Some((code, prefix)) => routes.push(OspfRoute {
                        code,
                        prefix,
                        admin_distance,
                        metric,
                        paths: vec![path],
                    }),
                    None => routes.last_mut().ok_or_else(malformed)?.paths.push(path),
                }
            }
        }
        if let Some((code, prefix)) = pending {
            return Err(ParseError::Malformed {
                command: Self::COMMAND,
                line: format!("{code} {prefix}"),
            });
        }
        Ok(Self { routes })
    }
}

/// Primary address of Loopback0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopbackAddress(pub Ipv4Addr);

impl CliRecord for LoopbackAddress {
    const COMMAND: &'static str = "show ip interface Loopback0 | include Internet address";

    fn parse(raw: &str) -> Result<Self, ParseError> {
        static LINE: OnceLock<Regex> = OnceLock::new();
        let line = regex(&LINE, r"Internet address is (\d+\.\d+\.\d+\.\d+)/\d+");

        if raw.trim().is_empty() {
            return Err(ParseError::Empty {
                command: Self::COMMAND,
            });
        }
        let caps = line.captures(raw).ok_or(ParseError::MissingField {
            command: Self::COMMAND,
            field: "internet_address",
        })?;
        Ok(Self(parse_ip(&caps[1], Self::COMMAND, "internet_address")?))
    }
}

/// Whether an OSPF process is running, from `show ip ospf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfProcessStatus {
    pub running: bool,
}

impl CliRecord for OspfProcessStatus {
    const COMMAND: &'static str = "show ip ospf";

    fn parse(raw: &str) -> Result<Self, ParseError> {
        let text = raw.trim();
        let lowered = text.to_ascii_lowercase();
        // IOS prints nothing, or "%OSPF: Router process not enabled", once removed.
        let running = !text.is_empty()
            && !lowered.contains("not enabled")
            && lowered.contains("routing process");
        Ok(Self { running })
    }
}
