//! Lab commands.
//!
//! Each command takes a connected [`LabContext`](crate::context::LabContext),
//! writes its artifacts into a fresh run directory and reports whether every
//! check passed. Errors returned from `run` are fatal; failed checks are not.

pub mod connectivity;
pub mod deploy;
pub mod export;
pub mod flap;
pub mod plan;
pub mod reset;
pub mod trend;

use crate::context::{LabContext, SharedSession};
use olab_common::DeviceId;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub success: bool,
    pub run_dir: Option<PathBuf>,
}

/// One unit of per-device work: the device and its session, or why it has none.
pub(crate) type DeviceWork = (DeviceId, Result<SharedSession, String>);

/// Work items for every inventory device, in inventory order.
pub(crate) fn inventory_work(ctx: &LabContext) -> Vec<DeviceWork> {
    ctx.config
        .devices
        .iter()
        .map(|d| (d.id.clone(), ctx.pool.session_or_reason(&d.id)))
        .collect()
}
