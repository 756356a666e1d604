//! Testbed and lab-plan configuration.
//!
//! The testbed file is TOML: a `[[devices]]` inventory plus an optional
//! `[lab]` table describing flap targets, timings, the SLA and the OSPF
//! topology. Everything in `[lab]` has defaults matching the four-router
//! lab, so a bare inventory is a valid testbed. `OLAB_*` environment
//! variables override selected values at process start.

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::errors::ConfigError;
use crate::types::{DeviceConfig, DeviceId, FlapTarget};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete testbed: inventory plus lab plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestbedConfig {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub lab: LabConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    /// Upper bound on concurrently running device tasks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Parent directory for timestamped run directories.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default)]
    pub flap: FlapConfig,
    #[serde(default)]
    pub ospf: OspfPlanConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            results_dir: default_results_dir(),
            flap: FlapConfig::default(),
            ospf: OspfPlanConfig::default(),
        }
    }
}

/// Timing and SLA settings for the interface flap test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlapConfig {
    /// Maximum acceptable convergence time.
    #[serde(default = "default_sla_target")]
    pub sla_target_secs: f64,
    /// How long the interface stays down before confirmation.
    #[serde(default = "default_settle")]
    pub settle_secs: f64,
    /// Window for observing the neighbor leave FULL.
    #[serde(default = "default_confirm_window")]
    pub confirm_window_secs: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_convergence_timeout")]
    pub convergence_timeout_secs: f64,
    #[serde(default = "default_restore_attempts")]
    pub restore_attempts: u32,
    #[serde(default = "default_targets")]
    pub targets: Vec<FlapTarget>,
}

impl Default for FlapConfig {
    fn default() -> Self {
        Self {
            sla_target_secs: default_sla_target(),
            settle_secs: default_settle(),
            confirm_window_secs: default_confirm_window(),
            poll_interval_ms: default_poll_interval_ms(),
            convergence_timeout_secs: default_convergence_timeout(),
            restore_attempts: default_restore_attempts(),
            targets: default_targets(),
        }
    }
}

impl FlapConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }

    pub fn confirm_window(&self) -> Duration {
        Duration::from_secs_f64(self.confirm_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.convergence_timeout_secs)
    }
}

/// One end of a point-to-point link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub device: DeviceId,
    pub interface: String,
}

impl Endpoint {
    pub fn new(device: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            device: DeviceId::new(device),
            interface: interface.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub endpoints: [Endpoint; 2],
}

/// OSPF /31 fabric description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OspfPlanConfig {
    #[serde(default = "default_process_id")]
    pub process_id: u32,
    #[serde(default = "default_area")]
    pub area: u32,
    /// Pool the /31 link subnets are carved from.
    #[serde(default = "default_link_pool")]
    pub link_pool: Ipv4Net,
    /// Wait after deployment before verifying neighbors.
    #[serde(default = "default_convergence_wait")]
    pub convergence_wait_secs: f64,
    #[serde(default = "default_links")]
    pub links: Vec<LinkConfig>,
    /// Router ID / Loopback0 address per device.
    #[serde(default = "default_loopbacks")]
    pub loopbacks: BTreeMap<DeviceId, Ipv4Addr>,
}

impl Default for OspfPlanConfig {
    fn default() -> Self {
        Self {
            process_id: default_process_id(),
            area: default_area(),
            link_pool: default_link_pool(),
            convergence_wait_secs: default_convergence_wait(),
            links: default_links(),
            loopbacks: default_loopbacks(),
        }
    }
}

impl OspfPlanConfig {
    pub fn convergence_wait(&self) -> Duration {
        Duration::from_secs_f64(self.convergence_wait_secs)
    }
}

fn default_max_workers() -> usize {
    10
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_sla_target() -> f64 {
    10.0
}

fn default_settle() -> f64 {
    5.0
}

fn default_confirm_window() -> f64 {
    5.0
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_convergence_timeout() -> f64 {
    30.0
}

fn default_restore_attempts() -> u32 {
    3
}

fn default_targets() -> Vec<FlapTarget> {
    vec![
        FlapTarget::new("R1", "GigabitEthernet0/1"),
        FlapTarget::new("R1", "GigabitEthernet0/2"),
    ]
}

fn default_process_id() -> u32 {
    10
}

fn default_area() -> u32 {
    10
}

fn default_link_pool() -> Ipv4Net {
    Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 24)
}

fn default_convergence_wait() -> f64 {
    30.0
}

fn default_links() -> Vec<LinkConfig> {
    let link = |name: &str, a: (&str, &str), b: (&str, &str)| LinkConfig {
        name: name.to_string(),
        endpoints: [Endpoint::new(a.0, a.1), Endpoint::new(b.0, b.1)],
    };
    vec![
        link(
            "R1_R2_G0_1",
            ("R1", "GigabitEthernet0/1"),
            ("R2", "GigabitEthernet0/1"),
        ),
        link(
            "R1_R4_G0_2",
            ("R1", "GigabitEthernet0/2"),
            ("R4", "GigabitEthernet0/2"),
        ),
        link(
            "R2_R3_G0_2",
            ("R2", "GigabitEthernet0/2"),
            ("R3", "GigabitEthernet0/2"),
        ),
        link(
            "R3_R4_G0_1",
            ("R3", "GigabitEthernet0/1"),
            ("R4", "GigabitEthernet0/1"),
        ),
    ]
}

fn default_loopbacks() -> BTreeMap<DeviceId, Ipv4Addr> {
    (1..=4u8)
        .map(|n| (DeviceId::new(format!("R{n}")), Ipv4Addr::new(n, n, n, n)))
        .collect()
}

impl TestbedConfig {
    /// Load and validate a testbed file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| &d.id == id)
    }

    /// Apply `OLAB_*` overrides. All invalid variables are reported together.
    pub fn apply_env_overrides(&mut self, parser: &mut EnvParser) -> Result<(), ConfigError> {
        if let Some(workers) = parser.get_u32_range("MAX_WORKERS", 1, 1024) {
            self.lab.max_workers = workers as usize;
        }
        if let Some(sla) = parser.get_f64_range("SLA_TARGET_SECS", 0.0, 3600.0) {
            self.lab.flap.sla_target_secs = sla;
        }
        if let Some(timeout) = parser.get_f64_range("CONVERGENCE_TIMEOUT_SECS", 0.0, 3600.0) {
            self.lab.flap.convergence_timeout_secs = timeout;
        }
        if let Some(dir) = parser.get_path("RESULTS_DIR") {
            self.lab.results_dir = dir;
        }

        let errors = parser.take_errors();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ConfigError::Env(joined));
        }
        self.validate()
    }

    /// Check cross-references and timing sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("testbed defines no devices".into()));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(&device.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device name '{}'",
                    device.id
                )));
            }
        }

        let lab = &self.lab;
        if lab.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }

        let flap = &lab.flap;
        if flap.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        for (name, value) in [
            ("sla_target_secs", flap.sla_target_secs),
            ("settle_secs", flap.settle_secs),
            ("confirm_window_secs", flap.confirm_window_secs),
            ("convergence_timeout_secs", flap.convergence_timeout_secs),
            ("convergence_wait_secs", lab.ospf.convergence_wait_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }
        if flap.convergence_timeout_secs <= flap.sla_target_secs {
            return Err(ConfigError::Invalid(format!(
                "convergence_timeout_secs ({}) must exceed sla_target_secs ({})",
                flap.convergence_timeout_secs, flap.sla_target_secs
            )));
        }
        if flap.restore_attempts == 0 {
            return Err(ConfigError::Invalid("restore_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Check that every flap target names a device in the inventory.
    ///
    /// Kept apart from [`Self::validate`] so that commands which never flap
    /// accept inventories without the default targets.
    pub fn validate_targets(&self) -> Result<(), ConfigError> {
        if self.lab.flap.targets.is_empty() {
            return Err(ConfigError::Invalid("no flap targets configured".into()));
        }
        for target in &self.lab.flap.targets {
            if self.device(&target.device).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "flap target {target} references unknown device"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::io::Write;

    const INVENTORY: &str = r#"
[[devices]]
name = "R1"
host = "192.168.1.11"
user = "cisco"
identity_file = "~/.ssh/lab"

[[devices]]
name = "R2"
host = "192.168.1.12"
user = "cisco"
identity_file = "~/.ssh/lab"

[[devices]]
name = "R3"
host = "192.168.1.13"
user = "cisco"
identity_file = "~/.ssh/lab"

[[devices]]
name = "R4"
host = "192.168.1.14"
user = "cisco"
identity_file = "~/.ssh/lab"
"#;

    fn write_testbed(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_bare_inventory_gets_lab_defaults() {
        let file = write_testbed(INVENTORY);
        let config = TestbedConfig::load(file.path()).unwrap();
        assert_eq!(config.devices.len(), 4);
        assert_eq!(config.lab.max_workers, 10);
        assert_eq!(config.lab.flap.sla_target_secs, 10.0);
        assert_eq!(config.lab.flap.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.lab.flap.targets.len(), 2);
        assert_eq!(config.lab.ospf.links.len(), 4);
        assert_eq!(config.lab.ospf.link_pool.to_string(), "10.0.0.0/24");
        assert_eq!(
            config.lab.ospf.loopbacks.get(&DeviceId::new("R3")),
            Some(&Ipv4Addr::new(3, 3, 3, 3))
        );
    }

    #[test]
    fn test_lab_section_overrides_defaults() {
        let file = write_testbed(&format!(
            r#"{INVENTORY}
[lab]
max_workers = 4

[lab.flap]
sla_target_secs = 5.0
convergence_timeout_secs = 20.0

[[lab.flap.targets]]
device = "R2"
interface = "GigabitEthernet0/2"
"#
        ));
        let config = TestbedConfig::load(file.path()).unwrap();
        assert_eq!(config.lab.max_workers, 4);
        assert_eq!(config.lab.flap.sla_target_secs, 5.0);
        assert_eq!(config.lab.flap.settle_secs, 5.0);
        assert_eq!(
            config.lab.flap.targets,
            vec![FlapTarget::new("R2", "GigabitEthernet0/2")]
        );
    }

    #[test]
    fn test_unknown_target_device_rejected() {
        let file = write_testbed(&format!(
            r#"{INVENTORY}
[[lab.flap.targets]]
device = "R9"
interface = "GigabitEthernet0/1"
"#
        ));
        let config = TestbedConfig::load(file.path()).unwrap();
        let err = config.validate_targets().unwrap_err();
        assert!(err.to_string().contains("R9"));
    }

    #[test]
    fn test_timeout_must_exceed_sla() {
        let file = write_testbed(&format!(
            "{INVENTORY}\n[lab.flap]\nsla_target_secs = 30.0\nconvergence_timeout_secs = 30.0\n"
        ));
        assert!(matches!(
            TestbedConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_empty_inventory_rejected() {
        let file = write_testbed("[lab]\nmax_workers = 2\n");
        assert!(matches!(
            TestbedConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = TestbedConfig::load(Path::new("/nonexistent/testbed.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides_apply() {
        let _lock = env_test_lock();
        // SAFETY: Tests serialize env access through env_test_lock.
        unsafe {
            std::env::set_var("OLABC_MAX_WORKERS", "3");
            std::env::set_var("OLABC_SLA_TARGET_SECS", "8");
        }
        let file = write_testbed(INVENTORY);
        let mut config = TestbedConfig::load(file.path()).unwrap();
        let mut parser = EnvParser::with_prefix("OLABC_");
        config.apply_env_overrides(&mut parser).unwrap();
        assert_eq!(config.lab.max_workers, 3);
        assert_eq!(config.lab.flap.sla_target_secs, 8.0);
        // SAFETY: Tests serialize env access through env_test_lock.
        unsafe {
            std::env::remove_var("OLABC_MAX_WORKERS");
            std::env::remove_var("OLABC_SLA_TARGET_SECS");
        }
    }
}
