//! Service controller port (interface).

use crate::domain::PortNumber;
use crate::error::Result;

/// Port for controlling the running proxy daemon.
///
/// The daemon is modelled as a capability set rather than a process type, so
/// a systemd unit, a container or a supervised child can all sit behind it.
pub trait ServiceControl: Send + Sync {
    /// Whether the service is currently active.
    fn currently_running(&self) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Make the service listen on `new_port`, which is already committed.
    ///
    /// Reloads in place when possible, otherwise stops and starts the service.
    /// On failure the service may be left stopped.
    fn apply(&self, new_port: PortNumber) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Restart the service on its previous known-good port.
    ///
    /// Called once after a failed `apply`; never retried.
    fn revert_and_restart(
        &self,
        old_port: PortNumber,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Stop the service and wait until it is inactive.
    ///
    /// Used to put back a service that was stopped before a failed attempt
    /// started it.
    fn stop(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}
