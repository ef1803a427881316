//! Domain layer - Pure business logic and data models.
//!
//! This module contains domain entities that represent core business concepts.
//! These types have no I/O dependencies and can be tested in isolation.

mod config;
mod outcome;
mod port;

// Re-export all domain types
pub use config::{
    ConfigTransaction, DocumentLayout, ServiceConfig, DEFAULT_LISTEN_POINTER, DEFAULT_PORT_POINTER,
};
pub use outcome::{Phase, ReconfigureOutcome};
pub use port::{parse, validate, InvalidPort, InvalidPortReason, PortNumber, MAX_PORT, MIN_PORT};
