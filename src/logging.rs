//! Tracing subscriber setup for the `pidx` binary.
//!
//! Logs go to stderr so stdout stays clean for reports and `--json` output.
//! The filter comes from `--log-level`, then `RUST_LOG`, then `info`.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format on stderr (`--log-format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(log_level: Option<&str>, format: LogFormat) -> Result<()> {
    let default_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_str = log_level.unwrap_or(&default_level);

    let env_filter =
        EnvFilter::try_new(filter_str).map_err(|e| anyhow!("Invalid log filter: {}", e))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Human => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(supports_color()),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| anyhow!("Failed to init logging: {}", e))
}

fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err() && atty::is(atty::Stream::Stderr)
}
