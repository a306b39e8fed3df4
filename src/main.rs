// src/main.rs

//! The main entry point for the steward keeper service.

use anyhow::Result;
use std::env;
use std::path::Path;
use std::sync::Arc;
use steward::config::Config;
use steward::core::errors::EXIT_CODE_BAD_ARGS;
use steward::keeper;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("steward version {VERSION}");
        return Ok(());
    }

    // The configuration file is the only required input; everything else
    // comes from the file or the environment.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("steward.toml");

    let mut config = match Config::from_file(Path::new(config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(e.exit_code());
        }
    };

    // Override the data directory if provided as a command-line argument.
    if let Some(pgdata_index) = args.iter().position(|arg| arg == "--pgdata") {
        match args.get(pgdata_index + 1) {
            Some(pgdata) => config.postgresql.pgdata = pgdata.into(),
            None => {
                eprintln!("--pgdata flag requires a value");
                std::process::exit(EXIT_CODE_BAD_ARGS);
            }
        }
    }

    // Setup logging with reloading capabilities so SIGHUP can change the
    // level without a restart. RUST_LOG wins over the configured level.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .init();

    let reload_handle = Arc::new(reload_handle);

    if let Err(e) = keeper::service::run(config, reload_handle).await {
        error!("keeper runtime error: {e}");
        std::process::exit(e.exit_code());
    }

    Ok(())
}
