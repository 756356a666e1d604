//! Shared building blocks for the OSPF lab tooling.
//!
//! - [`session`]: the `Connector`/`DeviceSession` seam and the SSH transport
//! - [`parse`]: typed records for IOS show commands
//! - [`topology`]: /31 address planning and OSPF command sets
//! - [`mock`]: simulated routers for tests and dry runs

pub mod config;
pub mod errors;
pub mod logging;
pub mod mock;
pub mod parse;
pub mod session;
pub mod topology;
pub mod types;

pub use config::{FlapConfig, LabConfig, OspfPlanConfig, TestbedConfig};
pub use errors::{ConfigError, LabError, ParseError, PlanError, SessionError};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use parse::{
    CliRecord, InterfaceTable, LoopbackAddress, OspfInterfaceTable, OspfProcessStatus,
    OspfRouteTable,
};
pub use session::{Connector, DeviceSession, SshOptions, neighbors, show};
#[cfg(unix)]
pub use session::SshConnector;
pub use topology::AddressPlan;
pub use types::{
    AdjacencyState, DeviceConfig, DeviceId, FlapTarget, NeighborRecord, NeighborSnapshot,
};
