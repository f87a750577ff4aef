//! web-shield binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use web_shield::api::{serve_with_state, AppState};
use web_shield::cli::{parse_args, print_help, print_version};
use web_shield::{logging, Config, InMemoryCredentialStore};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'web-shield --help' for more information.");
            return ExitCode::FAILURE;
        }
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if logging::try_init_with(&config.log_filter()).is_err() {
        eprintln!("warning: logging already initialized");
    }

    info!("web-shield v{}", env!("CARGO_PKG_VERSION"));

    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let credentials = InMemoryCredentialStore::from_entries(&config.users);
    info!(users = credentials.len(), "credential store loaded");

    let state = AppState::with_credentials(&server_config, Arc::new(credentials));

    match serve_with_state(server_config, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
