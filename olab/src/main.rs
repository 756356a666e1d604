//! OSPF Lab - command line entry point
//!
//! Loads the testbed, opens one session per router and runs a single lab
//! command; `plan` and `trend` work offline. Exit status: 0 when every check
//! passed, 1 when any check or flap target failed, 2 on a fatal error.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use olab::commands::{self, CommandOutcome};
use olab::context::LabContext;
use olab_common::config::EnvParser;
use olab_common::mock::MockConnector;
use olab_common::{AddressPlan, Connector, FlapTarget, LogConfig, TestbedConfig, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "olab")]
#[command(author, version, about = "OSPF lab automation and interface-flap SLA testing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Testbed file (TOML inventory plus optional [lab] plan)
    #[arg(long, global = true, env = "OLAB_TESTBED")]
    testbed: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Maximum number of devices worked on at once
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Directory that receives the per-run result folders
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Drive the built-in simulated four-router square instead of SSH
    #[arg(long, global = true)]
    simulate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that every management interface has an address
    Connectivity,

    /// Push the /31 point-to-point OSPF fabric and verify adjacencies
    Deploy,

    /// Export OSPF state, topology and a summary as JSON
    Export,

    /// Flap interfaces and measure OSPF reconvergence against the SLA
    Flap {
        /// Only flap targets on this device
        #[arg(long)]
        device: Option<String>,

        /// Flap this interface on --device instead of the configured targets
        #[arg(long, requires = "device")]
        interface: Option<String>,

        /// SLA target in seconds
        #[arg(long)]
        sla: Option<f64>,
    },

    /// Remove the OSPF fabric from every device
    Reset,

    /// Print the /31 address plan and per-device commands without connecting
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Analyze convergence trends across earlier flap runs without connecting
    Trend {
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Delay before a simulated adjacency returns to FULL.
const SIMULATED_CONVERGENCE: Duration = Duration::from_millis(3200);

fn load_testbed(cli: &Cli) -> Result<TestbedConfig> {
    let Some(path) = &cli.testbed else {
        bail!("--testbed <path> is required (or set OLAB_TESTBED)");
    };
    let mut config = TestbedConfig::load(path)
        .with_context(|| format!("Failed to load testbed {}", path.display()))?;
    config.apply_env_overrides(&mut EnvParser::new())?;

    if let Some(workers) = cli.max_workers {
        config.lab.max_workers = workers;
    }
    if let Some(dir) = &cli.results_dir {
        config.lab.results_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Narrow or replace the configured flap targets from the command line.
fn apply_flap_overrides(
    config: &mut TestbedConfig,
    device: Option<String>,
    interface: Option<String>,
    sla: Option<f64>,
) -> Result<()> {
    match (device, interface) {
        (Some(device), Some(interface)) => {
            config.lab.flap.targets = vec![FlapTarget::new(device, interface)];
        }
        (Some(device), None) => {
            config
                .lab
                .flap
                .targets
                .retain(|t| t.device.as_str() == device);
            if config.lab.flap.targets.is_empty() {
                bail!("no configured flap targets on {device}");
            }
        }
        _ => {}
    }
    if let Some(sla) = sla {
        config.lab.flap.sla_target_secs = sla;
    }
    config.validate()?;
    config.validate_targets()?;
    Ok(())
}

#[cfg(unix)]
fn ssh_connector() -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(olab_common::SshConnector::new(
        olab_common::SshOptions::default(),
    )))
}

#[cfg(not(unix))]
fn ssh_connector() -> Result<Arc<dyn Connector>> {
    bail!("SSH sessions need a unix host; use --simulate")
}

fn connector(simulate: bool) -> Result<Arc<dyn Connector>> {
    if simulate {
        info!("Using the simulated four-router lab");
        return Ok(Arc::new(MockConnector::square_lab(SIMULATED_CONVERGENCE)));
    }
    ssh_connector()
}

/// A command ready to run against connected devices.
enum Job {
    Connectivity,
    Deploy(AddressPlan),
    Export,
    Flap,
    Reset(AddressPlan),
}

async fn run(cli: Cli) -> Result<CommandOutcome> {
    let mut config = load_testbed(&cli)?;
    let build_plan = |config: &TestbedConfig| AddressPlan::build(&config.lab.ospf, &config.devices);

    // Plan errors are fatal before any device is touched.
    let job = match cli.command {
        Commands::Plan { json } => {
            commands::plan::run(&build_plan(&config)?, json)?;
            return Ok(CommandOutcome {
                success: true,
                run_dir: None,
            });
        }
        Commands::Trend { json } => {
            return commands::trend::run(
                &config.lab.results_dir,
                config.lab.flap.sla_target_secs,
                json,
            );
        }
        Commands::Connectivity => Job::Connectivity,
        Commands::Deploy => Job::Deploy(build_plan(&config)?),
        Commands::Export => Job::Export,
        Commands::Flap {
            device,
            interface,
            sla,
        } => {
            apply_flap_overrides(&mut config, device, interface, sla)?;
            Job::Flap
        }
        Commands::Reset => Job::Reset(build_plan(&config)?),
    };

    let wait = config.lab.ospf.convergence_wait();
    let ctx = LabContext::connect(config, connector(cli.simulate)?).await?;
    let outcome = match &job {
        Job::Connectivity => commands::connectivity::run(&ctx).await,
        Job::Deploy(plan) => commands::deploy::run(&ctx, plan, wait).await,
        Job::Export => commands::export::run(&ctx).await,
        Job::Flap => commands::flap::run(&ctx).await,
        Job::Reset(plan) => commands::reset::run(&ctx, plan).await,
    };
    ctx.close().await;
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = match init_logging(&log_config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(outcome) => {
            if let Some(dir) = &outcome.run_dir {
                println!("Results: {}", dir.display());
            }
            if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
