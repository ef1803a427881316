//! Settings command - show or initialise the settings file.

use std::process::ExitCode;

use anyhow::Result;
use proxyport_core::SettingsStore;

use super::{resolve_settings, Overrides};

pub async fn run(init: bool, overrides: &Overrides, json: bool) -> Result<ExitCode> {
    let store = SettingsStore::new()?;
    let settings = resolve_settings(overrides).await?;

    if init {
        store.save(&settings).await?;
        eprintln!("Wrote {}", store.path().display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Settings file:   {}", store.path().display());
    println!("Config file:     {}", settings.config_path.display());
    println!("Port pointer:    {}", settings.port_pointer);
    println!("Listen pointer:  {}", settings.listen_pointer);
    match settings.probe_host {
        Some(host) => println!("Probe host:      {}", host),
        None => println!("Probe host:      (listen address)"),
    }
    println!("Service unit:    {}", settings.service_unit);
    println!(
        "Reload:          {}",
        if settings.reload_supported { "yes" } else { "no (restart)" }
    );
    println!("Stop timeout:    {}s", settings.stop_timeout_secs);
    println!("Start timeout:   {}s", settings.start_timeout_secs);
    println!("Persist timeout: {}s", settings.persist_timeout_secs);
    println!("Health probe:    {}", settings.health_probe);
    println!("Check port free: {}", settings.check_port_available);
    println!("Lock policy:     {:?}", settings.lock_policy);
    Ok(ExitCode::SUCCESS)
}
