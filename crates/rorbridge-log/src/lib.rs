//! Structured logging for rorbridge.
//!
//! Installs a `tracing` subscriber with console output (targets and uptime)
//! and, when enabled, a JSON log file for post-mortem analysis. The level
//! comes from `debug.log_level` in the config unless `RUST_LOG` is set.
//! Records emitted through the `log` facade are forwarded as well.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rorbridge_config::Config;
use tracing::Subscriber;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file inside the log directory.
pub const LOG_FILE: &str = "rorbridge.log";

/// Filter directives for `config`, falling back to [`DEFAULT_FILTER`].
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => config.debug.log_level.trim().to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// JSON lines written to `file`.
pub fn json_file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json()
}

/// Install the global subscriber.
///
/// With `file_logging` and a `log_dir`, JSON records also go to
/// `<log_dir>/rorbridge.log`; the path is returned when that file was opened.
/// A log directory that cannot be created only disables file output.
pub fn init_logging(
    log_dir: Option<&Path>,
    file_logging: bool,
    config: Option<&Config>,
) -> Result<Option<PathBuf>, TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry().with(env_filter).with(console_layer);

    if file_logging
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
    {
        let path = log_dir.join(LOG_FILE);
        if let Ok(log_file) = File::create(&path) {
            subscriber.with(json_file_layer(log_file)).try_init()?;
            return Ok(Some(path));
        }
    }

    subscriber.try_init()?;
    Ok(None)
}
