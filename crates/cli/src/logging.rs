use crate::error::CliError;
use std::{fs::OpenOptions, path::Path, sync::Mutex};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logs to stdout and, when `log_file` is given, appends the same events to that file.
///
/// `RUST_LOG` wins over `log_level` when set.
pub fn init(log_level: &str, log_file: Option<&Path>) -> Result<(), CliError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    CliError::Logging(format!("cannot open {}: {err}", path.display()))
                })?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|err| CliError::Logging(err.to_string()))
}
