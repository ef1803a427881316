//! Proxyport Core Library
//!
//! Changes the listening port of a proxy daemon (trojan by default) that
//! reads its port from a JSON configuration file and runs as a systemd unit.
//! Provides functionality to:
//! - Validate a requested port
//! - Commit the port to the config file atomically, preserving everything else
//! - Reload or restart the service and verify it is healthy on the new port
//! - Roll back to the previous port when the service rejects the new one
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure business logic and data models
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: External system implementations
//! - `application`: Use case services

// Hexagonal architecture layers
pub mod domain;
pub mod ports;
pub mod adapters;
pub mod application;

pub mod error;
pub mod settings;

// Re-export domain types (primary API)
pub use domain::{
    parse, validate, ConfigTransaction, InvalidPort, InvalidPortReason, Phase, PortNumber,
    ReconfigureOutcome, ServiceConfig,
};

// Re-export other commonly used types
pub use adapters::{JsonConfigStore, LockPolicy, SystemdController, SystemdOptions};
pub use application::{ReconfigureOptions, ReconfigureOrchestrator, ServiceStatus};
pub use error::{Error, Result};
pub use settings::{Settings, SettingsStore};
