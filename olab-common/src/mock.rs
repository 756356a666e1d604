//! Simulated IOS routers for tests and dry runs.
//!
//! A [`MockRouter`] keeps interface and adjacency state, renders the show
//! commands the parsers understand, and applies the configuration lines the
//! lab pushes (`shutdown`, `no shutdown`, `router ospf`, addressing). After
//! `no shutdown` an adjacency walks INIT -> EXSTART -> FULL over its
//! configured convergence delay, measured on the tokio clock so paused-time
//! tests run instantly. [`MockConfig`] injects faults.

use crate::errors::SessionError;
use crate::session::{Connector, DeviceSession};
use crate::types::{AdjacencyState, DeviceConfig, canonical_interface_name};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const ROUTE_LEGEND: &str = "\
Codes: L - local, C - connected, S - static, R - RIP, M - mobile, B - BGP
       D - EIGRP, EX - EIGRP external, O - OSPF, IA - OSPF inter area
       N1 - OSPF NSSA external type 1, N2 - OSPF NSSA external type 2
       E1 - OSPF external type 1, E2 - OSPF external type 2
       i - IS-IS, su - IS-IS summary, L1 - IS-IS level-1, L2 - IS-IS level-2
       o - ODR, P - periodic downloaded static route, H - NHRP, l - LISP
       + - replicated route, % - next hop override
";

/// Fault injection knobs for a simulated router.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Refuse every connection attempt.
    pub refuse_connect: bool,
    /// Delay applied to every command and configuration push.
    pub command_latency: Duration,
    /// Number of upcoming `no shutdown` pushes to reject.
    pub fail_no_shutdown: u32,
    /// Number of upcoming `shutdown` pushes to reject.
    pub fail_shutdown: u32,
    /// Return empty output for this many neighbor polls after a `no shutdown`.
    pub empty_polls_after_restore: u32,
    /// After this many successful neighbor-table reads, every further read
    /// fails with a transport error.
    pub fail_neighbor_reads_after: Option<usize>,
}

impl MockConfig {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn connection_failure() -> Self {
        Self {
            refuse_connect: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct MockInterface {
    address: Option<(Ipv4Addr, u8)>,
    admin_up: bool,
    point_to_point: bool,
    ospf_area: Option<u32>,
}

#[derive(Debug, Clone)]
struct MockAdjacency {
    router_id: Ipv4Addr,
    address: Ipv4Addr,
    interface: String,
    convergence: Duration,
    /// When the local interface last came up; `None` means steady state.
    restored_at: Option<Instant>,
}

#[derive(Debug)]
struct RouterState {
    name: String,
    router_id: Ipv4Addr,
    ospf_process: Option<u32>,
    interfaces: BTreeMap<String, MockInterface>,
    adjacencies: Vec<MockAdjacency>,
    config: MockConfig,
    pending_empty_polls: u32,
    neighbor_reads: usize,
    config_log: Vec<String>,
    admin_history: Vec<AdminChange>,
}

/// One applied `shutdown` or `no shutdown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminChange {
    pub interface: String,
    pub up: bool,
    pub at: Instant,
}

impl RouterState {
    fn adjacency_state(&self, adjacency: &MockAdjacency, now: Instant) -> Option<AdjacencyState> {
        self.ospf_process?;
        let interface = self.interfaces.get(&adjacency.interface)?;
        if !interface.admin_up {
            return None;
        }
        let Some(restored_at) = adjacency.restored_at else {
            return Some(AdjacencyState::Full);
        };
        let elapsed = now.saturating_duration_since(restored_at);
        if elapsed >= adjacency.convergence {
            Some(AdjacencyState::Full)
        } else if elapsed >= adjacency.convergence / 2 {
            Some(AdjacencyState::ExStart)
        } else {
            Some(AdjacencyState::Init)
        }
    }

    fn render_neighbors(&self) -> String {
        let now = Instant::now();
        let mut out = String::from(
            "Neighbor ID     Pri   State           Dead Time   Address         Interface\n",
        );
        let mut rows = 0;
        for adjacency in &self.adjacencies {
            if let Some(state) = self.adjacency_state(adjacency, now) {
                rows += 1;
                out.push_str(&format!(
                    "{:<15} {:>3}   {:<15} {:<11} {:<15} {}\n",
                    adjacency.router_id,
                    0,
                    format!("{}/  -", state.as_ios()),
                    "00:00:35",
                    adjacency.address,
                    adjacency.interface
                ));
            }
        }
        // IOS prints nothing at all, not even the header, without adjacencies.
        if rows == 0 {
            String::new()
        } else {
            out
        }
    }

    fn render_interface_brief(&self) -> String {
        let mut out = String::from(
            "Interface              IP-Address      OK? Method Status                Protocol\n",
        );
        for (name, interface) in &self.interfaces {
            let ip = interface
                .address
                .map(|(ip, _)| ip.to_string())
                .unwrap_or_else(|| "unassigned".to_string());
            let method = if interface.address.is_some() { "manual" } else { "unset " };
            let (status, protocol) = if interface.admin_up {
                ("up", "up")
            } else {
                ("administratively down", "down")
            };
            out.push_str(&format!(
                "{name:<22} {ip:<15} YES {method} {status:<21} {protocol}\n"
            ));
        }
        out
    }

    fn render_ospf_interfaces(&self) -> String {
        let mut out = String::from(
            "Interface    PID   Area            IP Address/Mask    Cost  State Nbrs F/C\n",
        );
        let Some(process) = self.ospf_process else {
            return String::new();
        };
        let now = Instant::now();
        for (name, interface) in &self.interfaces {
            let (Some(area), Some((ip, len))) = (interface.ospf_area, interface.address) else {
                continue;
            };
            let loopback = name.starts_with("Loopback");
            let state = if loopback {
                "LOOP"
            } else if !interface.admin_up {
                "DOWN"
            } else if interface.point_to_point {
                "P2P"
            } else {
                "DR"
            };
            let on_interface: Vec<_> = self
                .adjacencies
                .iter()
                .filter(|a| &a.interface == name)
                .collect();
            let full = on_interface
                .iter()
                .filter(|a| self.adjacency_state(a, now) == Some(AdjacencyState::Full))
                .count();
            out.push_str(&format!(
                "{:<12} {:<5} {:<15} {:<18} {:<5} {:<5} {}/{}\n",
                short_name(name),
                process,
                area,
                format!("{ip}/{len}"),
                1,
                state,
                full,
                on_interface.len()
            ));
        }
        out
    }

    fn render_routes(&self) -> String {
        let mut out = String::from(ROUTE_LEGEND);
        out.push_str("\nGateway of last resort is not set\n\n");
        let now = Instant::now();
        for adjacency in &self.adjacencies {
            if self.adjacency_state(adjacency, now) == Some(AdjacencyState::Full) {
                out.push_str(&format!(
                    "O        {} [110/2] via {}, 00:01:02, {}\n",
                    adjacency.router_id, adjacency.address, adjacency.interface
                ));
            }
        }
        out
    }

    fn render_loopback(&self) -> String {
        match self.interfaces.get("Loopback0").and_then(|i| i.address) {
            Some((ip, len)) => format!("  Internet address is {ip}/{len}\n"),
            None => "% Invalid input detected at '^' marker.\n".to_string(),
        }
    }

    fn render_ospf_process(&self) -> String {
        match self.ospf_process {
            Some(pid) => format!(
                " Routing Process \"ospf {pid}\" with ID {}\n Start time: 00:00:12.345\n",
                self.router_id
            ),
            None => "%OSPF: Router process not enabled\n".to_string(),
        }
    }

    fn apply(&mut self, lines: &[String]) -> Result<(), String> {
        let mut current: Option<String> = None;
        for line in lines {
            self.config_log.push(line.clone());
            let trimmed = line.trim();
            let words: Vec<&str> = trimmed.split_whitespace().collect();
            match words.as_slice() {
                ["interface", name] => {
                    let name = canonical_interface_name(name);
                    self.interfaces
                        .entry(name.clone())
                        .or_insert_with(|| MockInterface {
                            address: None,
                            admin_up: true,
                            point_to_point: false,
                            ospf_area: None,
                        });
                    current = Some(name);
                }
                ["no", "interface", name] => {
                    self.interfaces.remove(&canonical_interface_name(name));
                    current = None;
                }
                ["router", "ospf", pid] => {
                    self.ospf_process = pid.parse().ok();
                    current = None;
                }
                ["no", "router", "ospf", ..] => {
                    self.ospf_process = None;
                    current = None;
                }
                ["router-id", id] => {
                    if let Ok(id) = id.parse() {
                        self.router_id = id;
                    }
                }
                ["shutdown"] => {
                    let name = current.clone().ok_or("shutdown outside interface")?;
                    if self.config.fail_shutdown > 0 {
                        self.config.fail_shutdown -= 1;
                        return Err(format!("% shutdown rejected on {name}"));
                    }
                    self.set_admin(&name, false);
                }
                ["no", "shutdown"] => {
                    let name = current.clone().ok_or("no shutdown outside interface")?;
                    if self.config.fail_no_shutdown > 0 {
                        self.config.fail_no_shutdown -= 1;
                        return Err(format!("% no shutdown rejected on {name}"));
                    }
                    self.set_admin(&name, true);
                }
                ["ip", "address", ip, mask] => {
                    let name = current.clone().ok_or("ip address outside interface")?;
                    let ip: Ipv4Addr = ip.parse().map_err(|_| format!("% bad address {ip}"))?;
                    let mask: Ipv4Addr = mask.parse().map_err(|_| format!("% bad mask {mask}"))?;
                    let len = u32::from(mask).count_ones() as u8;
                    if let Some(interface) = self.interfaces.get_mut(&name) {
                        interface.address = Some((ip, len));
                    }
                }
                ["no", "ip", "address"] => {
                    if let Some(interface) = current.as_ref().and_then(|n| self.interfaces.get_mut(n)) {
                        interface.address = None;
                    }
                }
                ["ip", "ospf", "network", "point-to-point"] => {
                    if let Some(interface) = current.as_ref().and_then(|n| self.interfaces.get_mut(n)) {
                        interface.point_to_point = true;
                    }
                }
                ["no", "ip", "ospf", "network", ..] => {
                    if let Some(interface) = current.as_ref().and_then(|n| self.interfaces.get_mut(n)) {
                        interface.point_to_point = false;
                    }
                }
                ["ip", "ospf", _pid, "area", area] => {
                    if let Some(interface) = current.as_ref().and_then(|n| self.interfaces.get_mut(n)) {
                        interface.ospf_area = area.parse().ok();
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn set_admin(&mut self, interface: &str, up: bool) {
        self.admin_history.push(AdminChange {
            interface: interface.to_string(),
            up,
            at: Instant::now(),
        });
        let was_up = self
            .interfaces
            .get(interface)
            .is_some_and(|i| i.admin_up);
        if let Some(entry) = self.interfaces.get_mut(interface) {
            entry.admin_up = up;
        }
        if up && !was_up {
            let now = Instant::now();
            for adjacency in self.adjacencies.iter_mut().filter(|a| a.interface == interface) {
                adjacency.restored_at = Some(now);
            }
            self.pending_empty_polls = self.config.empty_polls_after_restore;
        }
    }
}

fn short_name(name: &str) -> String {
    for (long, short) in [("GigabitEthernet", "Gi"), ("Loopback", "Lo")] {
        if let Some(rest) = name.strip_prefix(long) {
            return format!("{short}{rest}");
        }
    }
    name.to_string()
}

/// A simulated router; clones share state.
#[derive(Debug, Clone)]
pub struct MockRouter {
    state: Arc<Mutex<RouterState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockRouter {
    /// A router with OSPF running, a management interface and a loopback.
    pub fn new(name: impl Into<String>, router_id: Ipv4Addr) -> Self {
        let mut interfaces = BTreeMap::new();
        interfaces.insert(
            "GigabitEthernet0/0".to_string(),
            MockInterface {
                address: Some((Ipv4Addr::new(192, 168, 1, router_id.octets()[0]), 24)),
                admin_up: true,
                point_to_point: false,
                ospf_area: None,
            },
        );
        interfaces.insert(
            "Loopback0".to_string(),
            MockInterface {
                address: Some((router_id, 32)),
                admin_up: true,
                point_to_point: false,
                ospf_area: Some(10),
            },
        );
        Self {
            state: Arc::new(Mutex::new(RouterState {
                name: name.into(),
                router_id,
                ospf_process: Some(10),
                interfaces,
                adjacencies: Vec::new(),
                config: MockConfig::default(),
                pending_empty_polls: 0,
                neighbor_reads: 0,
                config_log: Vec::new(),
                admin_history: Vec::new(),
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_config(self, config: MockConfig) -> Self {
        {
            let mut state = self.lock();
            state.config = config;
        }
        self
    }

    /// Add a P2P interface carrying a FULL adjacency to `neighbor_id`.
    pub fn with_link(
        self,
        interface: &str,
        local: Ipv4Addr,
        neighbor_id: Ipv4Addr,
        neighbor_address: Ipv4Addr,
        convergence: Duration,
    ) -> Self {
        {
            let mut state = self.lock();
            let interface = canonical_interface_name(interface);
            state.interfaces.insert(
                interface.clone(),
                MockInterface {
                    address: Some((local, 31)),
                    admin_up: true,
                    point_to_point: true,
                    ospf_area: Some(10),
                },
            );
            state.adjacencies.push(MockAdjacency {
                router_id: neighbor_id,
                address: neighbor_address,
                interface,
                convergence,
                restored_at: None,
            });
        }
        self
    }

    /// Remove the management address (for connectivity checks).
    pub fn without_management_address(self) -> Self {
        {
            let mut state = self.lock();
            if let Some(interface) = state.interfaces.get_mut("GigabitEthernet0/0") {
                interface.address = None;
            }
        }
        self
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn is_admin_up(&self, interface: &str) -> bool {
        self.lock()
            .interfaces
            .get(&canonical_interface_name(interface))
            .is_some_and(|i| i.admin_up)
    }

    pub fn ospf_running(&self) -> bool {
        self.lock().ospf_process.is_some()
    }

    /// Every configuration line received, in order.
    pub fn config_log(&self) -> Vec<String> {
        self.lock().config_log.clone()
    }

    /// Admin state changes that were applied, in order.
    pub fn admin_history(&self) -> Vec<(String, bool)> {
        self.lock()
            .admin_history
            .iter()
            .map(|change| (change.interface.clone(), change.up))
            .collect()
    }

    /// Admin state changes with the tokio time they were applied.
    pub fn admin_changes(&self) -> Vec<AdminChange> {
        self.lock().admin_history.clone()
    }

    /// Highest number of simultaneously running calls observed.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> CallGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        CallGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    fn latency(&self) -> Duration {
        self.lock().config.command_latency
    }

    fn render(&self, command: &str) -> Result<String, SessionError> {
        let mut state = self.lock();
        let output = match command.trim() {
            "show ip ospf neighbor" => {
                if let Some(limit) = state.config.fail_neighbor_reads_after
                    && state.neighbor_reads >= limit
                {
                    return Err(SessionError::Command {
                        device: state.name.clone(),
                        command: command.to_string(),
                        message: "channel reset by peer".to_string(),
                    });
                }
                state.neighbor_reads += 1;
                if state.pending_empty_polls > 0 {
                    state.pending_empty_polls -= 1;
                    String::new()
                } else {
                    state.render_neighbors()
                }
            }
            "show ip interface brief" => state.render_interface_brief(),
            "show ip ospf interface brief" => state.render_ospf_interfaces(),
            "show ip route ospf" => state.render_routes(),
            "show ip ospf" => state.render_ospf_process(),
            c if c.starts_with("show ip interface Loopback0") => state.render_loopback(),
            other => format!("% Invalid input detected: {other}\n"),
        };
        Ok(output)
    }
}

struct CallGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session handed out by [`MockConnector`].
pub struct MockSession {
    device: String,
    router: MockRouter,
}

#[async_trait]
impl DeviceSession for MockSession {
    fn device(&self) -> &str {
        &self.device
    }

    async fn execute(&self, command: &str) -> Result<String, SessionError> {
        let _call = self.router.enter();
        let latency = self.router.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.router.render(command)
    }

    async fn configure(&self, lines: &[String]) -> Result<(), SessionError> {
        let _call = self.router.enter();
        let latency = self.router.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.router
            .lock()
            .apply(lines)
            .map_err(|message| SessionError::Configure {
                device: self.device.clone(),
                message,
            })
    }

    async fn disconnect(self: Box<Self>) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Connector over a set of simulated routers keyed by device name.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    routers: HashMap<String, MockRouter>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(mut self, router: MockRouter) -> Self {
        self.routers.insert(router.name(), router);
        self
    }

    pub fn router(&self, name: &str) -> Option<&MockRouter> {
        self.routers.get(name)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The four-router square used by the lab: R1-R2-R3-R4-R1 over /31s.
    pub fn square_lab(convergence: Duration) -> Self {
        let ip = |a, b, c, d| Ipv4Addr::new(a, b, c, d);
        let r1 = MockRouter::new("R1", ip(1, 1, 1, 1))
            .with_link("Gi0/1", ip(10, 0, 0, 0), ip(2, 2, 2, 2), ip(10, 0, 0, 1), convergence)
            .with_link("Gi0/2", ip(10, 0, 0, 2), ip(4, 4, 4, 4), ip(10, 0, 0, 3), convergence);
        let r2 = MockRouter::new("R2", ip(2, 2, 2, 2))
            .with_link("Gi0/1", ip(10, 0, 0, 1), ip(1, 1, 1, 1), ip(10, 0, 0, 0), convergence)
            .with_link("Gi0/2", ip(10, 0, 0, 4), ip(3, 3, 3, 3), ip(10, 0, 0, 5), convergence);
        let r3 = MockRouter::new("R3", ip(3, 3, 3, 3))
            .with_link("Gi0/2", ip(10, 0, 0, 5), ip(2, 2, 2, 2), ip(10, 0, 0, 4), convergence)
            .with_link("Gi0/1", ip(10, 0, 0, 6), ip(4, 4, 4, 4), ip(10, 0, 0, 7), convergence);
        let r4 = MockRouter::new("R4", ip(4, 4, 4, 4))
            .with_link("Gi0/2", ip(10, 0, 0, 3), ip(1, 1, 1, 1), ip(10, 0, 0, 2), convergence)
            .with_link("Gi0/1", ip(10, 0, 0, 7), ip(3, 3, 3, 3), ip(10, 0, 0, 6), convergence);
        Self::new()
            .with_router(r1)
            .with_router(r2)
            .with_router(r3)
            .with_router(r4)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, device: &DeviceConfig) -> Result<Box<dyn DeviceSession>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let router = self
            .routers
            .get(device.id.as_str())
            .ok_or_else(|| SessionError::Connect {
                device: device.id.to_string(),
                message: "no route to host".to_string(),
            })?;
        if router.lock().config.refuse_connect {
            return Err(SessionError::Connect {
                device: device.id.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Box::new(MockSession {
            device: device.id.to_string(),
            router: router.clone(),
        }))
    }
}
