//! Reconfiguration phases and reported outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::port::{InvalidPortReason, PortNumber};

// ============================================================================
// Phase
// ============================================================================

/// Where a reconfiguration attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Validating,
    Staging,
    Applying,
    /// New port durable and adopted by the service.
    Committed,
    /// Rejected before anything was touched.
    Failed,
    RollingBack,
    /// Apply failed, previous port restored.
    RolledBack,
    /// Apply and rollback both failed.
    Degraded,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Validating => "validating",
            Phase::Staging => "staging",
            Phase::Applying => "applying",
            Phase::Committed => "committed",
            Phase::Failed => "failed",
            Phase::RollingBack => "rolling back",
            Phase::RolledBack => "rolled back",
            Phase::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ReconfigureOutcome
// ============================================================================

/// Result of a port change, reported back to the command line layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReconfigureOutcome {
    /// The service now listens on `port`.
    Success {
        port: PortNumber,
        previous_port: PortNumber,
        /// False when the port was already in effect and nothing was touched.
        restarted: bool,
    },

    /// The input was rejected; nothing was changed.
    ValidationFailed { reason: InvalidPortReason },

    /// The service refused the new port and the change was rolled back.
    ApplyFailed {
        port: PortNumber,
        previous_port: PortNumber,
        reason: String,
        /// Store and run state both match what they were before the attempt.
        recovered: bool,
        /// Whether the service is running now. False when it was stopped
        /// before the attempt and has been left stopped.
        service_running: bool,
    },

    /// Rollback failed too; the service needs manual attention.
    Degraded {
        port: PortNumber,
        previous_port: PortNumber,
        reasons: Vec<String>,
        /// Port the configuration store holds now, if it could be read.
        store_port: Option<PortNumber>,
        service_running: bool,
    },
}

impl ReconfigureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReconfigureOutcome::Success { .. })
    }
}

impl From<InvalidPortReason> for ReconfigureOutcome {
    fn from(reason: InvalidPortReason) -> Self {
        ReconfigureOutcome::ValidationFailed { reason }
    }
}

impl fmt::Display for ReconfigureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconfigureOutcome::Success {
                port,
                previous_port,
                restarted: true,
            } => write!(
                f,
                "Port changed from {} to {}; service is listening on {}",
                previous_port, port, port
            ),
            ReconfigureOutcome::Success { port, .. } => {
                write!(f, "Port is already {}; nothing to change", port)
            }
            ReconfigureOutcome::ValidationFailed { reason } => match reason {
                InvalidPortReason::NotANumber => write!(f, "Port must be a number"),
                InvalidPortReason::OutOfRange => write!(f, "Port must be in the range 1-65535"),
                InvalidPortReason::InUse => write!(
                    f,
                    "Port is already in use by another process; choose a different port"
                ),
            },
            ReconfigureOutcome::ApplyFailed {
                port,
                previous_port,
                reason,
                recovered: true,
                service_running: true,
            } => write!(
                f,
                "Service could not switch to port {}: {}. Rolled back; configuration and \
                 service are back on port {}",
                port, reason, previous_port
            ),
            ReconfigureOutcome::ApplyFailed {
                port,
                previous_port,
                reason,
                recovered: true,
                service_running: false,
            } => write!(
                f,
                "Service could not switch to port {}: {}. Rolled back; configuration is back \
                 on port {} and the service is stopped, as it was before",
                port, reason, previous_port
            ),
            ReconfigureOutcome::ApplyFailed {
                port,
                previous_port,
                reason,
                recovered: false,
                ..
            } => write!(
                f,
                "Service could not switch to port {}: {}. The service is stopped, as it was \
                 before, but the configuration still says {} instead of {}; fix the \
                 configuration file",
                port, reason, port, previous_port
            ),
            ReconfigureOutcome::Degraded {
                port,
                previous_port,
                reasons,
                store_port,
                service_running,
            } => {
                write!(
                    f,
                    "Service could not switch to port {} and could not be restored to port \
                     {}: {}. ",
                    port,
                    previous_port,
                    reasons.join("; ")
                )?;
                match store_port {
                    Some(p) => write!(f, "Configuration holds port {}; ", p)?,
                    None => write!(f, "Configuration could not be read back; ")?,
                }
                if *service_running {
                    write!(
                        f,
                        "service is running but not confirmed healthy. Manual intervention \
                         required"
                    )
                } else {
                    write!(f, "service is DOWN. Manual intervention required")
                }
            }
        }
    }
}
