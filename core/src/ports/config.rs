//! Configuration store port (interface).

use crate::domain::{ConfigTransaction, PortNumber, ServiceConfig};
use crate::error::Result;

/// Port for the proxy's persisted configuration.
///
/// Implementations own the authoritative document. Only `commit` may touch
/// durable storage, and it must replace the document atomically: a concurrent
/// `load` sees either the old or the new document, never a partial one.
pub trait ConfigRepository: Send + Sync {
    /// Read the authoritative configuration.
    ///
    /// Fails with `ConfigUnreadable` if the document is missing or malformed.
    fn load(&self) -> impl std::future::Future<Output = Result<ServiceConfig>> + Send;

    /// Stage a candidate with only the port replaced. No I/O.
    fn stage(&self, base: ServiceConfig, new_port: PortNumber) -> ConfigTransaction {
        ConfigTransaction::new(base, new_port)
    }

    /// Durably replace the authoritative configuration with the candidate.
    fn commit(
        &self,
        tx: &ConfigTransaction,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Drop a staged transaction without touching storage.
    fn discard(&self, tx: ConfigTransaction) {
        tracing::debug!(tx = %tx.id(), port = %tx.new_port(), "Discarded staged config");
    }
}
