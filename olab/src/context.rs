//! Lab context: validated configuration plus the device session pool.
//!
//! Each phase receives `&LabContext`; nothing about the testbed is global.

use crate::dispatch::dispatch;
use anyhow::{Result, bail};
use olab_common::{Connector, DeviceConfig, DeviceId, DeviceSession, TestbedConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A session shared between tasks; the mutex serializes use of the CLI stream.
pub type SharedSession = Arc<Mutex<Box<dyn DeviceSession>>>;

/// One session per reachable device, plus the reason each other device is missing.
#[derive(Default)]
pub struct SessionPool {
    sessions: BTreeMap<DeviceId, SharedSession>,
    failures: BTreeMap<DeviceId, String>,
}

impl SessionPool {
    /// Connect to every device in parallel, at most `limit` at a time.
    pub async fn connect_all(
        connector: Arc<dyn Connector>,
        devices: &[DeviceConfig],
        limit: usize,
    ) -> Self {
        let completed = dispatch(devices.to_vec(), limit, move |device: DeviceConfig| {
            let connector = Arc::clone(&connector);
            async move { connector.connect(&device).await }
        })
        .await;

        let mut pool = Self::default();
        for done in completed {
            let id = devices[done.index].id.clone();
            match done.result {
                Ok(Ok(session)) => {
                    info!(device = %id, "Connected");
                    pool.sessions.insert(id, Arc::new(Mutex::new(session)));
                }
                Ok(Err(e)) => {
                    warn!(device = %id, error = %e, "Connection failed");
                    pool.failures.insert(id, e.to_string());
                }
                Err(panic) => {
                    warn!(device = %id, error = %panic, "Connection task failed");
                    pool.failures.insert(id, panic.to_string());
                }
            }
        }
        pool
    }

    pub fn session(&self, device: &DeviceId) -> Option<SharedSession> {
        self.sessions.get(device).cloned()
    }

    /// Why `device` has no session, if it was attempted and failed.
    pub fn failure(&self, device: &DeviceId) -> Option<&str> {
        self.failures.get(device).map(String::as_str)
    }

    /// Session or the reason there is none.
    pub fn session_or_reason(&self, device: &DeviceId) -> Result<SharedSession, String> {
        self.session(device).ok_or_else(|| {
            self.failure(device)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{device} is not in the session pool"))
        })
    }

    pub fn connected(&self) -> impl Iterator<Item = &DeviceId> {
        self.sessions.keys()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DeviceId, &str)> {
        self.failures.iter().map(|(id, reason)| (id, reason.as_str()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session in parallel.
    ///
    /// Waits for each device lock first, so restorations still running in
    /// the background finish before their session goes away.
    pub async fn close_all(self, limit: usize) {
        let sessions: Vec<(DeviceId, SharedSession)> = self.sessions.into_iter().collect();
        let completed = dispatch(sessions, limit, |(id, shared): (DeviceId, SharedSession)| async move {
            drop(shared.lock().await);
            match Arc::try_unwrap(shared) {
                Ok(mutex) => {
                    if let Err(e) = mutex.into_inner().disconnect().await {
                        warn!(device = %id, error = %e, "Disconnect failed");
                    }
                }
                Err(_) => warn!(device = %id, "Session still in use, leaving it to drop"),
            }
        })
        .await;
        info!(closed = completed.len(), "Sessions closed");
    }
}

/// Everything a lab command needs.
pub struct LabContext {
    pub config: TestbedConfig,
    pub pool: SessionPool,
}

impl LabContext {
    /// Open sessions to the whole inventory.
    ///
    /// Fails when no device at all is reachable.
    pub async fn connect(config: TestbedConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let pool =
            SessionPool::connect_all(connector, &config.devices, config.lab.max_workers).await;
        if pool.is_empty() {
            let reasons: Vec<String> = pool
                .failures()
                .map(|(id, reason)| format!("{id}: {reason}"))
                .collect();
            bail!("no device is reachable ({})", reasons.join("; "));
        }
        info!(
            connected = pool.len(),
            total = config.devices.len(),
            "Session pool ready"
        );
        Ok(Self { config, pool })
    }

    pub fn max_workers(&self) -> usize {
        self.config.lab.max_workers
    }

    pub async fn close(self) {
        let limit = self.max_workers();
        self.pool.close_all(limit).await;
    }
}
