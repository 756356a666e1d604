use olab::context::LabContext;
use olab_common::mock::MockConnector;
use olab_common::TestbedConfig;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A testbed file for the four-router square plus a scratch results directory.
pub struct Testbed {
    pub dir: TempDir,
    pub path: PathBuf,
    pub results_dir: PathBuf,
}

impl Testbed {
    pub fn config(&self) -> TestbedConfig {
        TestbedConfig::load(&self.path).expect("Failed to load testbed")
    }
}

/// Write a testbed for R1..R4. `flap` is appended to `[lab.flap]`; put plain
/// keys before any `[[lab.flap.targets]]` entries.
pub fn square_testbed(flap: &str) -> Testbed {
    crate::test_log!("FIXTURE: Creating square testbed");

    let dir = TempDir::new().expect("Failed to create temp dir");
    let results_dir = dir.path().join("results");
    let path = dir.path().join("testbed.toml");

    let mut toml = String::new();
    for n in 1..=4 {
        toml.push_str(&format!(
            "[[devices]]\nname = \"R{n}\"\nhost = \"192.168.1.{n}\"\nuser = \"cisco\"\nidentity_file = \"~/.ssh/lab\"\n\n"
        ));
    }
    toml.push_str(&format!(
        "[lab]\nresults_dir = '{}'\n\n[lab.ospf]\nconvergence_wait_secs = 2.0\n\n[lab.flap]\npoll_interval_ms = 100\n{flap}\n",
        results_dir.display()
    ));
    fs::write(&path, toml).expect("Failed to write testbed");

    Testbed {
        dir,
        path,
        results_dir,
    }
}

pub async fn connect(config: TestbedConfig, connector: MockConnector) -> LabContext {
    LabContext::connect(config, Arc::new(connector))
        .await
        .expect("Failed to connect to the simulated lab")
}
