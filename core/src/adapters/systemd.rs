//! systemd service controller.
//!
//! Drives the proxy's unit through `systemctl`:
//! - `systemctl is-active --quiet UNIT` / `is-failed` to query state
//! - `systemctl reload UNIT` for in-place reload (when the proxy supports it)
//! - `systemctl stop UNIT` / `start UNIT` otherwise
//!
//! Every command and every wait is bounded.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::probe;
use crate::domain::PortNumber;
use crate::error::{Error, Result};
use crate::ports::ServiceControl;

/// Interval between state polls.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound for status queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// `systemctl is-active` exit code for a unit that does not exist.
const EXIT_NO_SUCH_UNIT: i32 = 4;

/// Reference to the running proxy: the unit it runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    unit: String,
}

impl ServiceHandle {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }
}

/// Tunables for [`SystemdController`].
#[derive(Debug, Clone)]
pub struct SystemdOptions {
    /// `systemctl` binary.
    pub systemctl: PathBuf,
    /// The proxy re-reads its config on `systemctl reload`.
    pub reload_supported: bool,
    /// Bound for stopping the unit and waiting for it to go inactive.
    pub stop_timeout: Duration,
    /// Bound for starting the unit and waiting for it to become healthy.
    pub start_timeout: Duration,
    /// Also require the port to accept TCP connections before calling it healthy.
    pub health_probe: bool,
    /// Address the health probe connects to.
    pub probe_host: IpAddr,
}

impl Default for SystemdOptions {
    fn default() -> Self {
        Self {
            systemctl: PathBuf::from("systemctl"),
            reload_supported: false,
            stop_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(10),
            health_probe: true,
            probe_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// Service controller for a proxy running as a systemd unit.
pub struct SystemdController {
    handle: ServiceHandle,
    options: SystemdOptions,
}

impl SystemdController {
    pub fn new(handle: ServiceHandle, options: SystemdOptions) -> Self {
        Self { handle, options }
    }

    /// Controller for `unit` with default options.
    pub fn for_unit(unit: impl Into<String>) -> Self {
        Self::new(ServiceHandle::new(unit), SystemdOptions::default())
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn options(&self) -> &SystemdOptions {
        &self.options
    }

    /// Run `systemctl <verb> [flags] UNIT`, bounded by `limit`.
    async fn systemctl(
        &self,
        verb: &'static str,
        flags: &[&str],
        limit: Duration,
    ) -> Result<Output> {
        debug!(unit = self.handle.unit(), verb, "Running systemctl");

        let mut command = Command::new(&self.options.systemctl);
        command
            .arg(verb)
            .args(flags)
            .arg(self.handle.unit())
            .kill_on_drop(true);

        match timeout(limit, command.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(Error::Timeout {
                operation: verb,
                after: limit,
            }),
        }
    }

    async fn is_active(&self) -> Result<bool> {
        let output = self
            .systemctl("is-active", &["--quiet"], QUERY_TIMEOUT)
            .await
            .map_err(|e| Error::StatusUnknown(e.to_string()))?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(EXIT_NO_SUCH_UNIT) => Err(Error::StatusUnknown(format!(
                "Unit {} not found",
                self.handle.unit()
            ))),
            Some(_) => Ok(false),
            None => Err(Error::StatusUnknown(
                "systemctl was terminated by a signal".to_string(),
            )),
        }
    }

    async fn is_failed(&self) -> bool {
        matches!(
            self.systemctl("is-failed", &["--quiet"], QUERY_TIMEOUT).await,
            Ok(output) if output.status.success()
        )
    }

    /// Stop the unit and wait until it is inactive.
    async fn stop_unit(&self) -> Result<()> {
        let deadline = Instant::now() + self.options.stop_timeout;

        let output = self.systemctl("stop", &[], self.options.stop_timeout).await?;
        if !output.status.success() {
            return Err(Error::ApplyFailure(format!(
                "systemctl stop {} failed: {}",
                self.handle.unit(),
                stderr_of(&output)
            )));
        }

        while self.is_active().await? {
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "service stop",
                    after: self.options.stop_timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }

        debug!(unit = self.handle.unit(), "Service stopped");
        Ok(())
    }

    /// Start the unit and wait until it is healthy on `port`.
    async fn start(&self, port: PortNumber) -> Result<()> {
        let output = self.systemctl("start", &[], self.options.start_timeout).await?;
        if !output.status.success() {
            return Err(Error::ApplyFailure(format!(
                "systemctl start {} failed: {}",
                self.handle.unit(),
                stderr_of(&output)
            )));
        }
        self.wait_healthy(port).await
    }

    /// Wait until the unit is active and, if probing, listening on `port`.
    async fn wait_healthy(&self, port: PortNumber) -> Result<()> {
        let limit = self.options.start_timeout;
        let deadline = Instant::now() + limit;

        loop {
            if self.is_active().await? && self.accepts_connections(port).await {
                debug!(unit = self.handle.unit(), port = %port, "Service healthy");
                return Ok(());
            }
            if self.is_failed().await {
                return Err(Error::ApplyFailure(format!(
                    "{} entered the failed state while starting on port {}",
                    self.handle.unit(),
                    port
                )));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "service start",
                    after: limit,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn accepts_connections(&self, port: PortNumber) -> bool {
        !self.options.health_probe || probe::is_listening(self.options.probe_host, port).await
    }

    async fn reload(&self, port: PortNumber) -> Result<()> {
        let output = self.systemctl("reload", &[], self.options.start_timeout).await?;
        if !output.status.success() {
            return Err(Error::ApplyFailure(format!(
                "systemctl reload {} failed: {}",
                self.handle.unit(),
                stderr_of(&output)
            )));
        }
        self.wait_healthy(port).await
    }

    async fn restart_on(&self, port: PortNumber) -> Result<()> {
        self.stop_unit().await?;
        self.start(port).await
    }
}

impl ServiceControl for SystemdController {
    async fn currently_running(&self) -> Result<bool> {
        self.is_active().await
    }

    async fn apply(&self, new_port: PortNumber) -> Result<()> {
        if self.options.reload_supported && self.is_active().await.unwrap_or(false) {
            match self.reload(new_port).await {
                Ok(()) => {
                    info!(unit = self.handle.unit(), port = %new_port, "Reloaded service in place");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        unit = self.handle.unit(),
                        error = %e,
                        "Reload failed, falling back to restart"
                    );
                }
            }
        }

        self.restart_on(new_port).await?;
        info!(unit = self.handle.unit(), port = %new_port, "Restarted service");
        Ok(())
    }

    async fn revert_and_restart(&self, old_port: PortNumber) -> Result<()> {
        self.restart_on(old_port)
            .await
            .map_err(|e| Error::RecoveryFailure(e.to_string()))?;
        info!(unit = self.handle.unit(), port = %old_port, "Service restored on previous port");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_unit()
            .await
            .map_err(|e| Error::RecoveryFailure(e.to_string()))?;
        info!(unit = self.handle.unit(), "Service stopped");
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    }
}
