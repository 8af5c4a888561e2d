use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const COMMAND_LOG: &str = "commands.log";

/// Installs the global subscriber: human-readable lines on stderr plus JSON lines
/// appended to `<logs_dir>/commands.log`. `RUST_LOG` overrides `default_level`.
///
/// Keep the returned guard alive for the life of the process, or buffered file
/// lines are lost on exit.
pub fn init_logging(logs_dir: &Path, default_level: &str) -> Result<WorkerGuard, InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::never(logs_dir, COMMAND_LOG);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid logLevel: {error}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().json().with_writer(file_writer))
        .try_init()
        .map_err(|error| {
            InfraError::InvalidConfig(format!("logging already initialized: {error}"))
        })?;

    Ok(guard)
}
