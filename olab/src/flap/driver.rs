//! Per-target flap driver.
//!
//! Sequence: baseline, shutdown, settle, confirm the neighbor left FULL,
//! no shutdown, poll for convergence, post-flap snapshot. The device lock is
//! held for the whole sequence so targets on the same router never overlap.
//!
//! Whatever happens after the shutdown is sent, the interface ends up
//! admin-up: [`AdminDownGuard`] restores it on drop, restoration is retried,
//! and `no shutdown` is re-sent if polling fails.

use super::poller::{PollOutcome, poll_convergence};
use super::report::{ConvergenceResult, Outcome};
use super::{FlapPhase, FlapSettings};
use crate::context::SharedSession;
use futures::FutureExt;
use olab_common::session::set_admin_state;
use olab_common::types::canonical_interface_name;
use olab_common::{DeviceSession, FlapTarget, SessionError, neighbors};
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Device lock held while an interface is (possibly) administratively down.
///
/// Armed from just before `shutdown` is sent until a `no shutdown` succeeds.
/// Dropping an armed guard spawns the restoration onto the current runtime;
/// the spawned task keeps the device lock until it finishes.
pub struct AdminDownGuard {
    session: Option<OwnedMutexGuard<Box<dyn DeviceSession>>>,
    interface: String,
    attempts: u32,
    retry_delay: Duration,
    armed: bool,
}

impl AdminDownGuard {
    pub fn arm(
        session: OwnedMutexGuard<Box<dyn DeviceSession>>,
        interface: &str,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            session: Some(session),
            interface: interface.to_string(),
            attempts: attempts.max(1),
            retry_delay,
            armed: true,
        }
    }

    pub fn session(&self) -> &dyn DeviceSession {
        // Only Drop takes the session out.
        &***self.session.as_ref().expect("session held until drop")
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        set_admin_state(self.session(), &self.interface, false).await
    }

    /// Send `no shutdown`, retrying; disarms on success.
    ///
    /// Returns the number of attempts used.
    pub async fn restore(&mut self) -> Result<u32, SessionError> {
        let attempts =
            restore_admin_up(self.session(), &self.interface, self.attempts, self.retry_delay)
                .await?;
        self.armed = false;
        Ok(attempts)
    }
}

impl Drop for AdminDownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };
        let interface = std::mem::take(&mut self.interface);
        let (attempts, retry_delay) = (self.attempts, self.retry_delay);
        let device = session.device().to_string();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    device = %device,
                    interface = %interface,
                    "Interface left down, restoring in background"
                );
                handle.spawn(async move {
                    match restore_admin_up(&**session, &interface, attempts, retry_delay).await {
                        Ok(_) => info!(
                            device = %device,
                            interface = %interface,
                            "Interface restored in background"
                        ),
                        Err(e) => error!(
                            device = %device,
                            interface = %interface,
                            error = %e,
                            "Interface is still shut down; manual 'no shutdown' required"
                        ),
                    }
                });
            }
            Err(_) => error!(
                device = %device,
                interface = %interface,
                "No runtime available to restore interface; manual 'no shutdown' required"
            ),
        }
    }
}

async fn restore_admin_up(
    session: &dyn DeviceSession,
    interface: &str,
    attempts: u32,
    retry_delay: Duration,
) -> Result<u32, SessionError> {
    let mut attempt = 1;
    loop {
        match set_admin_state(session, interface, true).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(
                    device = session.device(),
                    interface,
                    attempt,
                    attempts,
                    error = %e,
                    "no shutdown failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// Watch for the neighbor to leave FULL. Never fails; returns whether it did.
async fn confirm_neighbor_left(
    session: &dyn DeviceSession,
    router_id: Ipv4Addr,
    interface: &str,
    window: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + window;
    loop {
        match neighbors(session).await {
            Ok(snapshot) if !snapshot.is_full_on(router_id, interface) => return true,
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Confirmation sample failed"),
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

fn transition(phase: &mut FlapPhase, next: FlapPhase) {
    match phase.advance(next) {
        Ok(()) => debug!(phase = ?next, "Phase"),
        Err(e) => error!(error = %e, "Flap phase out of order"),
    }
}

fn setup_failure(target: &FlapTarget, phase: &mut FlapPhase, reason: String) -> ConvergenceResult {
    warn!(%reason, "Setup failed");
    transition(phase, FlapPhase::SetupFailed);
    ConvergenceResult::setup_failed(target, reason)
}

/// Flap one interface and measure reconvergence.
pub async fn run_target(
    session: SharedSession,
    target: FlapTarget,
    settings: FlapSettings,
) -> ConvergenceResult {
    let interface = canonical_interface_name(&target.interface);
    let span = info_span!("flap", device = %target.device, interface = %interface);
    drive(session, &target, &interface, &settings)
        .instrument(span)
        .await
}

async fn drive(
    session: SharedSession,
    target: &FlapTarget,
    interface: &str,
    settings: &FlapSettings,
) -> ConvergenceResult {
    let mut phase = FlapPhase::NotStarted;
    let locked = session.lock_owned().await;

    let baseline = match neighbors(&**locked).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return setup_failure(target, &mut phase, format!("baseline capture failed: {e}"));
        }
    };
    transition(&mut phase, FlapPhase::BaselineCaptured);

    let expected = baseline
        .on_interface(interface)
        .find(|n| n.state.is_full())
        .cloned();
    let Some(expected) = expected else {
        return setup_failure(
            target,
            &mut phase,
            format!("no FULL neighbor on {interface} in baseline"),
        )
        .with_baseline(baseline);
    };
    info!(
        neighbor = %expected.router_id,
        full_neighbors = baseline.full_count(),
        "Baseline captured"
    );

    let mut guard = AdminDownGuard::arm(
        locked,
        interface,
        settings.restore_attempts,
        settings.poll_interval,
    );
    if let Err(e) = guard.shutdown().await {
        if let Err(restore) = guard.restore().await {
            warn!(error = %restore, "Restore after failed shutdown also failed");
        }
        return setup_failure(target, &mut phase, format!("shutdown failed: {e}"))
            .with_baseline(baseline);
    }
    let down_at = Instant::now();
    transition(&mut phase, FlapPhase::InterfaceDown);
    info!(settle_secs = settings.settle.as_secs_f64(), "Interface shut down");

    tokio::time::sleep(settings.settle).await;
    let dropped = confirm_neighbor_left(
        guard.session(),
        expected.router_id,
        interface,
        settings.confirm_window,
        settings.poll_interval,
    )
    .await;
    if dropped {
        debug!(neighbor = %expected.router_id, "Neighbor left FULL");
    } else {
        warn!(neighbor = %expected.router_id, "Neighbor still FULL after the confirmation window");
    }

    if let Err(e) = guard.restore().await {
        return setup_failure(
            target,
            &mut phase,
            format!(
                "interface restore failed after {} attempts: {e}",
                settings.restore_attempts
            ),
        )
        .with_baseline(baseline)
        .with_neighbor_dropped(dropped);
    }
    let restored_at = Instant::now();
    transition(&mut phase, FlapPhase::InterfaceRestored);
    transition(&mut phase, FlapPhase::Polling);

    let polled = AssertUnwindSafe(poll_convergence(
        guard.session(),
        expected.router_id,
        interface,
        settings.poll_interval,
        settings.timeout,
    ))
    .catch_unwind()
    .await;

    let result = match polled {
        Ok(Ok(PollOutcome::Converged {
            elapsed,
            polls,
            parse_failures,
        })) => {
            transition(&mut phase, FlapPhase::Converged);
            let outage = restored_at.duration_since(down_at) + elapsed;
            info!(
                elapsed_secs = elapsed.as_secs_f64(),
                outage_secs = outage.as_secs_f64(),
                polls,
                parse_failures,
                "Converged"
            );
            ConvergenceResult::converged(target, elapsed, outage, settings.sla_target_secs)
        }
        Ok(Ok(PollOutcome::TimedOut {
            elapsed,
            polls,
            parse_failures,
        })) => {
            transition(&mut phase, FlapPhase::TimedOut);
            warn!(
                timeout_secs = settings.timeout.as_secs_f64(),
                polls, parse_failures, "Convergence timed out"
            );
            ConvergenceResult::timed_out(target, elapsed)
        }
        Ok(Err(e)) => {
            reassert(&mut guard).await;
            setup_failure(target, &mut phase, format!("convergence polling failed: {e}"))
        }
        Err(_) => {
            reassert(&mut guard).await;
            setup_failure(target, &mut phase, "convergence poller panicked".to_string())
        }
    };

    let mut result = result
        .with_baseline(baseline)
        .with_neighbor_dropped(dropped);
    if result.outcome != Outcome::SetupFailed {
        match neighbors(guard.session()).await {
            Ok(post_flap) => result = result.with_post_flap(post_flap),
            Err(e) => warn!(error = %e, "Post-flap snapshot failed"),
        }
        if result.baseline_restored == Some(false) {
            warn!("Not every baseline neighbor is FULL after the flap");
        }
    }
    result
}

/// Re-send `no shutdown` after polling ended abnormally.
async fn reassert(guard: &mut AdminDownGuard) {
    match guard.restore().await {
        Ok(_) => debug!("Re-asserted no shutdown"),
        Err(e) => error!(error = %e, "Re-asserting no shutdown failed"),
    }
}
