use std::io;

use fleet_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FLEET_LOG";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Filter precedence: `--log`, then `FLEET_LOG`, then the configured level.
pub fn resolve_filter(cli: Option<&str>, env: Option<&str>, config: &LoggingConfig) -> String {
    cli.or(env)
        .map(str::trim)
        .filter(|filter| !filter.is_empty())
        .unwrap_or(config.level.as_str())
        .to_string()
}

pub fn build_filter(filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(filter).map_err(|source| LoggingError::Filter {
        filter: filter.to_string(),
        source,
    })
}

/// Installs the global subscriber. Logs go to stderr so stdout stays clean
/// for tables and `--json` output.
pub fn init_logging(config: &LoggingConfig, cli_filter: Option<&str>) -> Result<(), LoggingError> {
    let env_filter = std::env::var(LOG_ENV).ok();
    let filter = build_filter(&resolve_filter(cli_filter, env_filter.as_deref(), config))?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(io::stderr)
                    .with_target(false),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .try_init()?,
    }
    Ok(())
}
