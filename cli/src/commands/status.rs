//! Status command - show the configured port and service state.

use std::process::ExitCode;

use anyhow::Result;

use super::{orchestrator, resolve_settings, Overrides};

pub async fn run(overrides: &Overrides, json: bool) -> Result<ExitCode> {
    let settings = resolve_settings(overrides).await?;
    let status = orchestrator(&settings).await.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Config:  {}", settings.config_path.display());
    println!("Port:    {}", status.configured_port);
    println!(
        "Service: {} ({})",
        settings.service_unit,
        if status.running { "running" } else { "stopped" }
    );
    Ok(ExitCode::SUCCESS)
}
