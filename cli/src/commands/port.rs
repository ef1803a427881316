//! Port command - move the proxy to a new port.

use std::process::ExitCode;

use anyhow::{bail, Result};
use proxyport_core::{Error, ReconfigureOutcome};

use super::{orchestrator, resolve_settings, Overrides, EXIT_ERROR};
use crate::prompt::StdinPrompt;

pub async fn run(port: Option<String>, overrides: &Overrides, json: bool) -> Result<ExitCode> {
    let settings = resolve_settings(overrides).await?;
    let orchestrator = orchestrator(&settings).await;

    let result = match port {
        Some(text) => orchestrator.change_port(&text).await,
        None => {
            if !atty::is(atty::Stream::Stdin) {
                bail!("No port given and stdin is not a terminal");
            }
            orchestrator.change_port_interactive(&StdinPrompt).await
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(Error::Cancelled) => {
            eprintln!("Cancelled; nothing was changed.");
            return Ok(ExitCode::from(EXIT_ERROR));
        }
        Err(Error::Busy) => {
            bail!("Another port change for {} is in progress", settings.config_path.display())
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.is_success() {
        println!("{}", outcome);
    } else {
        eprintln!("{}", outcome);
    }

    Ok(ExitCode::from(exit_code(&outcome)))
}

fn exit_code(outcome: &ReconfigureOutcome) -> u8 {
    match outcome {
        ReconfigureOutcome::Success { .. } => 0,
        ReconfigureOutcome::ValidationFailed { .. } => 1,
        ReconfigureOutcome::ApplyFailed { .. } => 2,
        ReconfigureOutcome::Degraded { .. } => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyport_core::{InvalidPortReason, PortNumber};

    #[test]
    fn test_exit_codes() {
        let port = PortNumber::try_from(8443).unwrap();
        let previous_port = PortNumber::try_from(443).unwrap();

        assert_eq!(
            exit_code(&ReconfigureOutcome::Success {
                port,
                previous_port,
                restarted: true
            }),
            0
        );
        assert_eq!(
            exit_code(&ReconfigureOutcome::ValidationFailed {
                reason: InvalidPortReason::NotANumber
            }),
            1
        );
        assert_eq!(
            exit_code(&ReconfigureOutcome::ApplyFailed {
                port,
                previous_port,
                reason: "bind failed".to_string(),
                recovered: true,
                service_running: true
            }),
            2
        );
        assert_eq!(
            exit_code(&ReconfigureOutcome::Degraded {
                port,
                previous_port,
                reasons: vec![],
                store_port: None,
                service_running: false
            }),
            3
        );
    }
}
