//! Proxyport CLI - Change the listening port of a proxy daemon
//!
//! A command-line tool for moving a systemd-managed proxy (trojan by
//! default) onto a new port, with automatic rollback when the service
//! refuses it.

mod commands;
mod prompt;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use commands::Overrides;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "PROXYPORT_LOG";

#[derive(Parser)]
#[command(name = "proxyport")]
#[command(author, version, about = "Change the listening port of a proxy daemon")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Proxy configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// systemd unit running the proxy
    #[arg(long, global = true, value_name = "NAME")]
    unit: Option<String>,

    /// JSON pointer to the port field
    #[arg(long, global = true, value_name = "PTR")]
    port_pointer: Option<String>,

    /// Log more (repeat for trace output)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Move the proxy to a new port (prompts when PORT is omitted)
    Port {
        /// New port number
        port: Option<String>,
    },

    /// Show the configured port and whether the service is running
    Status,

    /// Show the resolved settings
    Settings {
        /// Write the settings file with current values
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = Overrides {
        config: cli.config,
        unit: cli.unit,
        port_pointer: cli.port_pointer,
    };

    let result = match cli.command {
        Some(Commands::Port { port }) => commands::port::run(port, &overrides, cli.json).await,
        Some(Commands::Status) => commands::status::run(&overrides, cli.json).await,
        Some(Commands::Settings { init }) => {
            commands::settings::run(init, &overrides, cli.json).await
        }
        // Default: interactive port change
        None => commands::port::run(None, &overrides, cli.json).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(commands::EXIT_ERROR)
        }
    }
}
