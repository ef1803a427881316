//! Application layer - Use case services.
//!
//! Services orchestrate domain logic and adapter interactions:
//! - Accept domain types as inputs
//! - Use ports (traits) for external dependencies
//! - Return domain types as outputs

mod reconfigure;

pub use reconfigure::{ReconfigureOptions, ReconfigureOrchestrator, ServiceStatus};
