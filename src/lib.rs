pub mod app;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use app::config::{load_config, load_config_from_path, validate_config, AppConfig};
use app::logging::init_logging;
use app::session::Session;

/// Host controller console.
#[derive(Parser, Debug, Default)]
#[command(name = "host_controller", version, about)]
pub struct Cli {
    /// Config file; defaults to HOST_CONTROLLER_CONFIG_PATH or ~/.host_controller_config.json.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Number of job pool workers.
    #[arg(long)]
    pub pool_size: Option<usize>,
    /// Job lease endpoint base URL.
    #[arg(long)]
    pub vti: Option<String>,
    /// Run this campaign script instead of the interactive console.
    #[arg(long)]
    pub script: Option<PathBuf>,
    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,
}

/// Applies command-line overrides on top of the loaded config.
pub fn apply_cli_overrides(mut config: AppConfig, cli: &Cli) -> AppConfig {
    if let Some(size) = cli.pool_size {
        config.job_pool.pool_size = size;
    }
    if let Some(endpoint) = &cli.vti {
        config.vti.endpoint = endpoint.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    validate_config(config)
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let loaded = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    let config = match loaded {
        Ok(config) => apply_cli_overrides(config, &cli),
        Err(err) => {
            eprintln!("{}", err.console_line());
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);

    let session = match Session::start(config) {
        Ok(session) => session,
        Err(err) => {
            error!(code = %err.code, error = %err.error, "failed to start console");
            eprintln!("{}", err.console_line());
            return ExitCode::FAILURE;
        }
    };
    let ok = match &cli.script {
        Some(script) => session.run_script(script),
        None => session.repl(io::stdin().lock()),
    };
    session.close();

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
