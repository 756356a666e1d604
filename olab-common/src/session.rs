//! Device sessions.
//!
//! A [`Connector`] opens a [`DeviceSession`] for one router. Sessions issue
//! exec-mode commands and push configuration lines; everything above this
//! module talks to devices only through these two traits, which lets the
//! runner drive real routers over SSH or the simulated routers in
//! [`crate::mock`].

use crate::errors::{LabError, ParseError, SessionError};
use crate::parse::CliRecord;
use crate::types::{DeviceConfig, NeighborSnapshot};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, trace};

/// A live CLI session to one device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Device name as known to the inventory.
    fn device(&self) -> &str;

    /// Run one exec-mode command and return its raw output.
    async fn execute(&self, command: &str) -> Result<String, SessionError>;

    /// Enter configuration mode, apply `lines` in order, and exit.
    async fn configure(&self, lines: &[String]) -> Result<(), SessionError>;

    /// Close the session.
    async fn disconnect(self: Box<Self>) -> Result<(), SessionError>;
}

/// Opens sessions to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &DeviceConfig) -> Result<Box<dyn DeviceSession>, SessionError>;
}

/// Run the command behind `R` and parse its output.
pub async fn show<R: CliRecord>(session: &dyn DeviceSession) -> Result<R, LabError> {
    let raw = session.execute(R::COMMAND).await?;
    trace!(device = session.device(), command = R::COMMAND, bytes = raw.len(), "Command output");
    Ok(R::parse(&raw)?)
}

/// Read the OSPF neighbor table.
///
/// IOS prints nothing, not even the header, once the last adjacency is gone,
/// so empty output is an empty table here. The convergence poller uses
/// [`show`] instead and counts empty output as a missed sample.
pub async fn neighbors(session: &dyn DeviceSession) -> Result<NeighborSnapshot, LabError> {
    match show::<NeighborSnapshot>(session).await {
        Err(LabError::Parse(ParseError::Empty { .. })) => Ok(NeighborSnapshot::default()),
        other => other,
    }
}

/// Configuration lines that set an interface administratively up or down.
pub fn admin_state_lines(interface: &str, up: bool) -> Vec<String> {
    vec![
        format!("interface {interface}"),
        if up { " no shutdown" } else { " shutdown" }.to_string(),
    ]
}

/// Set the administrative state of an interface.
pub async fn set_admin_state(
    session: &dyn DeviceSession,
    interface: &str,
    up: bool,
) -> Result<(), SessionError> {
    debug!(
        device = session.device(),
        interface,
        up,
        "Setting interface admin state"
    );
    session.configure(&admin_state_lines(interface, up)).await
}

/// SSH connection options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(unix)]
pub use ssh::{SshConnector, SshSession};

#[cfg(unix)]
mod ssh {
    use super::*;
    use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
    use tokio::io::AsyncWriteExt;

    /// Connector backed by the system OpenSSH client (multiplexed).
    #[derive(Debug, Clone, Default)]
    pub struct SshConnector {
        options: SshOptions,
    }

    impl SshConnector {
        pub fn new(options: SshOptions) -> Self {
            Self { options }
        }
    }

    #[async_trait]
    impl Connector for SshConnector {
        async fn connect(
            &self,
            device: &DeviceConfig,
        ) -> Result<Box<dyn DeviceSession>, SessionError> {
            let identity = shellexpand::tilde(&device.identity_file).into_owned();
            let mut builder = SessionBuilder::default();
            builder
                .user(device.user.clone())
                .port(device.port)
                .keyfile(&identity)
                .connect_timeout(self.options.connect_timeout)
                .known_hosts_check(KnownHosts::Accept);

            debug!(device = %device.id, host = %device.host, port = device.port, "Opening SSH session");
            let session = builder
                .connect(&device.host)
                .await
                .map_err(|e| SessionError::Connect {
                    device: device.id.to_string(),
                    message: e.to_string(),
                })?;

            Ok(Box::new(SshSession {
                device: device.id.to_string(),
                session,
                command_timeout: self.options.command_timeout,
            }))
        }
    }

    /// One SSH session to a router; each call uses its own exec channel.
    pub struct SshSession {
        device: String,
        session: Session,
        command_timeout: Duration,
    }

    impl SshSession {
        fn command_error(&self, command: &str, message: impl ToString) -> SessionError {
            SessionError::Command {
                device: self.device.clone(),
                command: command.to_string(),
                message: message.to_string(),
            }
        }
    }

    #[async_trait]
    impl DeviceSession for SshSession {
        fn device(&self) -> &str {
            &self.device
        }

        async fn execute(&self, command: &str) -> Result<String, SessionError> {
            let output = tokio::time::timeout(
                self.command_timeout,
                self.session.raw_command(command).output(),
            )
            .await
            .map_err(|_| self.command_error(command, "timed out"))?
            .map_err(|e| self.command_error(command, e))?;

            if !output.status.success() {
                return Err(self.command_error(
                    command,
                    format!(
                        "exit status {:?}: {}",
                        output.status.code(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                ));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }

        async fn configure(&self, lines: &[String]) -> Result<(), SessionError> {
            let configure_error = |message: String| SessionError::Configure {
                device: self.device.clone(),
                message,
            };

            // IOS reads configuration lines from the channel until "end".
            let mut script = lines.join("\n");
            script.push_str("\nend\n");

            let run = async {
                let mut child = self
                    .session
                    .raw_command("configure terminal")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .await
                    .map_err(|e| configure_error(e.to_string()))?;

                if let Some(mut stdin) = child.stdin().take() {
                    stdin
                        .write_all(script.as_bytes())
                        .await
                        .map_err(|e| configure_error(e.to_string()))?;
                    stdin
                        .shutdown()
                        .await
                        .map_err(|e| configure_error(e.to_string()))?;
                }

                let output = child
                    .wait_with_output()
                    .await
                    .map_err(|e| configure_error(e.to_string()))?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(rejected) = stdout.lines().find(|l| l.trim_start().starts_with('%')) {
                    return Err(configure_error(rejected.trim().to_string()));
                }
                Ok(())
            };

            tokio::time::timeout(self.command_timeout, run)
                .await
                .map_err(|_| configure_error("timed out".to_string()))?
        }

        async fn disconnect(self: Box<Self>) -> Result<(), SessionError> {
            let device = self.device.clone();
            self.session
                .close()
                .await
                .map_err(|e| SessionError::Closed {
                    device: format!("{device} ({e})"),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_state_lines() {
        assert_eq!(
            admin_state_lines("GigabitEthernet0/1", false),
            vec!["interface GigabitEthernet0/1", " shutdown"]
        );
        assert_eq!(
            admin_state_lines("GigabitEthernet0/1", true),
            vec!["interface GigabitEthernet0/1", " no shutdown"]
        );
    }

    #[test]
    fn test_ssh_options_default() {
        let options = SshOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.command_timeout, Duration::from_secs(30));
    }
}
