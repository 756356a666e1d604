//! OSPF lab automation.
//!
//! - [`context`]: validated testbed plus the per-device session pool
//! - [`dispatch`]: bounded parallel fan-out shared by every command
//! - [`flap`]: interface flap driver, convergence poller and SLA report
//! - [`commands`]: connectivity, deploy, export, flap, reset, plan and trend

#![forbid(unsafe_code)]

pub mod commands;
pub mod context;
pub mod dispatch;
pub mod flap;
pub mod output;

pub use commands::CommandOutcome;
pub use context::{LabContext, SessionPool, SharedSession};
