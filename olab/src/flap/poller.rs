//! Convergence polling.

use olab_common::{DeviceSession, LabError, NeighborSnapshot, SessionError, show};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// The neighbor reached FULL `elapsed` after polling started.
    Converged { elapsed: Duration, polls: u32, parse_failures: u32 },
    /// The deadline passed first; `elapsed` is the time spent polling.
    TimedOut { elapsed: Duration, polls: u32, parse_failures: u32 },
}

impl PollOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Converged { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Sample the neighbor table until `router_id` is FULL on `interface`.
///
/// The first sample is taken immediately and the last one at the deadline.
/// FULL seen past the deadline still counts as a timeout, so a converged
/// result always has `elapsed <= timeout`. Empty or malformed
/// output counts as a miss; transport errors end polling.
pub async fn poll_convergence(
    session: &dyn DeviceSession,
    router_id: Ipv4Addr,
    interface: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<PollOutcome, SessionError> {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut polls = 0u32;
    let mut parse_failures = 0u32;

    loop {
        polls += 1;
        match show::<NeighborSnapshot>(session).await {
            Ok(snapshot)
                if snapshot.is_full_on(router_id, interface) && start.elapsed() <= timeout =>
            {
                let elapsed = start.elapsed();
                debug!(
                    device = session.device(),
                    interface,
                    %router_id,
                    elapsed_secs = elapsed.as_secs_f64(),
                    polls,
                    "Neighbor FULL"
                );
                return Ok(PollOutcome::Converged {
                    elapsed,
                    polls,
                    parse_failures,
                });
            }
            Ok(snapshot) => {
                let state = snapshot.find(router_id, interface).map(|n| n.state);
                trace!(device = session.device(), interface, ?state, "Not converged yet");
            }
            Err(LabError::Parse(e)) => {
                parse_failures += 1;
                trace!(device = session.device(), error = %e, "Unparseable neighbor output");
            }
            Err(LabError::Session(e)) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut {
                elapsed: now - start,
                polls,
                parse_failures,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
