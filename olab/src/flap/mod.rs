//! Interface flap convergence testing.
//!
//! For each target the [`driver`] captures a baseline, shuts the interface,
//! brings it back and hands off to the [`poller`], which measures how long
//! the adjacency takes to return to FULL. The [`report`] module folds the
//! per-target results into an SLA report.

pub mod driver;
pub mod poller;
pub mod report;

pub use driver::{AdminDownGuard, run_target};
pub use poller::{PollOutcome, poll_convergence};
pub use report::{ConvergenceResult, Outcome, SlaReport, SlaSummary, aggregate};

use olab_common::FlapConfig;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Timing and SLA parameters for one run.
#[derive(Debug, Clone)]
pub struct FlapSettings {
    pub settle: Duration,
    pub confirm_window: Duration,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub sla_target_secs: f64,
    pub restore_attempts: u32,
}

impl From<&FlapConfig> for FlapSettings {
    fn from(config: &FlapConfig) -> Self {
        Self {
            settle: config.settle(),
            confirm_window: config.confirm_window(),
            poll_interval: config.poll_interval(),
            timeout: config.convergence_timeout(),
            sla_target_secs: config.sla_target_secs,
            restore_attempts: config.restore_attempts,
        }
    }
}

/// Lifecycle of one flap target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlapPhase {
    NotStarted,
    BaselineCaptured,
    InterfaceDown,
    InterfaceRestored,
    Polling,
    Converged,
    TimedOut,
    SetupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal flap phase transition {from:?} -> {to:?}")]
pub struct PhaseError {
    pub from: FlapPhase,
    pub to: FlapPhase,
}

impl FlapPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::TimedOut | Self::SetupFailed)
    }

    /// Move to `next`, rejecting anything off the happy path other than a
    /// setup failure from a non-terminal phase.
    pub fn advance(&mut self, next: FlapPhase) -> Result<(), PhaseError> {
        use FlapPhase::*;
        let allowed = match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (_, SetupFailed) => true,
            (NotStarted, BaselineCaptured)
            | (BaselineCaptured, InterfaceDown)
            | (InterfaceDown, InterfaceRestored)
            | (InterfaceRestored, Polling)
            | (Polling, Converged)
            | (Polling, TimedOut) => true,
            _ => false,
        };
        if !allowed {
            return Err(PhaseError {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}
