mod cli;
mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{env, fs};

use config::{APP_DIR_NAME, AppConfig, ConfigStore, LoggingConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Invocation, USAGE};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = match Invocation::parse(&args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("error: {err:#}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let data_dir =
        config::default_data_dir().unwrap_or_else(|_| PathBuf::from(".").join(APP_DIR_NAME));
    if let Err(err) = fs::create_dir_all(&data_dir) {
        eprintln!("failed to prepare data dir: {err}");
    }

    let config_store = ConfigStore::from_default_location()
        .unwrap_or_else(|_| ConfigStore::from_dir(data_dir.join("config")));
    let (config, config_error) = match config_store.load_or_init() {
        Ok(cfg) => (cfg, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };

    let _log_guard = init_local_logger(&data_dir.join("logs"), &config.logging);
    if let Some(err) = config_error {
        error!("failed to load config: {err:#}");
    }
    info!(config = %config_store.path().display(), "notekeep starting");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to create tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(commands::run(&config, &data_dir, invocation)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("command failed: {err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_local_logger(
    log_dir: &Path,
    logging: &LoggingConfig,
) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "notekeep.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new(LoggingConfig::default().filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
