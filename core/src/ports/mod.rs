//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces that the application layer uses
//! to interact with external systems. Implementations live in `adapters`.

mod config;
mod prompt;
mod service;

pub use config::ConfigRepository;
pub use prompt::PortPrompt;
pub use service::ServiceControl;
