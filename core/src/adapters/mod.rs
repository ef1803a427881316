//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits defined in `ports`.
//! Each adapter handles communication with external systems.

pub(crate) mod atomic_file;
pub mod config_store;
pub mod lock_file;
pub mod probe;
pub mod systemd;

// Re-export main types for convenience
pub use config_store::JsonConfigStore;
pub use lock_file::{LockFile, LockPolicy};
pub use probe::Availability;
pub use systemd::{ServiceHandle, SystemdController, SystemdOptions};
