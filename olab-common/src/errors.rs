//! Error types for device sessions, CLI parsing and lab configuration.
//!
//! Failures fall into groups that drive how the runner reacts:
//!
//! | Kind    | Type            | Handling                                     |
//! |---------|-----------------|----------------------------------------------|
//! | Setup   | `SessionError`  | per-target, recorded as a setup failure      |
//! | Parse   | `ParseError`    | transient inside poll loops, retried         |
//! | Timeout | (poll outcome)  | per-target, reported                         |
//! | Fatal   | `ConfigError`   | aborts before any target is dispatched       |
//! | Fatal   | `PlanError`     | aborts before any device is configured       |

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the device transport.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection to {device} failed: {message}")]
    Connect { device: String, message: String },

    #[error("command '{command}' failed on {device}: {message}")]
    Command {
        device: String,
        command: String,
        message: String,
    },

    #[error("configuration rejected by {device}: {message}")]
    Configure { device: String, message: String },

    #[error("session to {device} is closed")]
    Closed { device: String },
}

impl SessionError {
    pub fn device(&self) -> &str {
        match self {
            Self::Connect { device, .. }
            | Self::Command { device, .. }
            | Self::Configure { device, .. }
            | Self::Closed { device } => device,
        }
    }
}

/// Errors raised while turning raw CLI output into typed records.
///
/// Empty or malformed output is expected while a link is transitioning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("'{command}' returned no output")]
    Empty { command: &'static str },

    #[error("'{command}' output has no recognizable header")]
    MissingHeader { command: &'static str },

    #[error("malformed line in '{command}' output: {line:?}")]
    Malformed { command: &'static str, line: String },

    #[error("field '{field}' missing from '{command}' output")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
}

/// Errors loading or validating the testbed file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read testbed {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse testbed {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid testbed: {0}")]
    Invalid(String),

    #[error("invalid environment overrides: {0}")]
    Env(String),
}

/// Errors building the /31 address plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("link pool {pool} cannot be split into /31 subnets")]
    PoolPrefix { pool: String },

    #[error("link pool {pool} holds {available} /31 subnets but {needed} links are defined")]
    PoolExhausted {
        pool: String,
        available: usize,
        needed: usize,
    },

    #[error("{device}:{interface} is assigned to more than one link")]
    DuplicateEndpoint { device: String, interface: String },

    #[error("link {link} references unknown device {device}")]
    UnknownDevice { link: String, device: String },

    #[error("no loopback address defined for {device}")]
    MissingLoopback { device: String },
}

/// Umbrella error for adapter calls that both talk to a device and parse.
#[derive(Debug, Error)]
pub enum LabError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl LabError {
    /// Parse failures are transient while adjacencies re-form.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}
