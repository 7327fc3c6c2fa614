//! Credential Gate - authenticating reverse proxy
//!
//! Forwards a request to the protected backend only when its signed
//! credential resolves to an authorized directory user.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use credential_gate::{cli::Cli, config::Config, gate::Gate, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    // `.env` in the working directory feeds both clap env fallbacks and figment
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded env file");
    }

    run_server(cli).await
}

/// Run the gate server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            cli.apply_overrides(&mut config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        client_address = ?config.client_address.mode,
        "Starting credential gate"
    );

    let gate = match Gate::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gate: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gate.run().await {
        error!("Gate error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gate shutdown complete");
    ExitCode::SUCCESS
}
