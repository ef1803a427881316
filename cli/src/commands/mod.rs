//! Subcommand implementations.

pub mod port;
pub mod settings;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use proxyport_core::adapters::ServiceHandle;
use proxyport_core::ports::ConfigRepository;
use proxyport_core::{
    JsonConfigStore, ReconfigureOrchestrator, Settings, SettingsStore, SystemdController,
};

/// Exit code for errors that changed nothing.
pub const EXIT_ERROR: u8 = 4;

/// Command line values that take precedence over the settings file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub unit: Option<String>,
    pub port_pointer: Option<String>,
}

/// Load settings from disk and apply the command line overrides.
pub async fn resolve_settings(overrides: &Overrides) -> Result<Settings> {
    let store = SettingsStore::new()?;
    let mut settings = store
        .load()
        .await
        .with_context(|| format!("loading {}", store.path().display()))?;

    if let Some(config) = &overrides.config {
        settings.config_path = config.clone();
    }
    if let Some(unit) = &overrides.unit {
        settings.service_unit = unit.clone();
    }
    if let Some(pointer) = &overrides.port_pointer {
        settings.port_pointer = pointer.clone();
    }
    Ok(settings)
}

/// Build the orchestrator for the proxy `settings` describe.
///
/// The proxy config is read once up front to aim the health probe at its
/// listen address; an unreadable config is reported by the command itself.
pub async fn orchestrator(
    settings: &Settings,
) -> ReconfigureOrchestrator<JsonConfigStore, SystemdController> {
    let store = JsonConfigStore::new(&settings.config_path, settings.port_pointer.as_str());
    let config = store.load().await.ok();
    let controller = SystemdController::new(
        ServiceHandle::new(settings.service_unit.as_str()),
        settings.systemd_options(config.as_ref()),
    );
    ReconfigureOrchestrator::new(store, controller, settings.orchestrator_options())
}
