//! Tracing subscriber setup.
//!
//! Logs go to stderr so that `redraft chunk --json` and `redraft rewrite`
//! can write their results to stdout. `RUST_LOG` takes precedence over
//! `[log].filter`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(config: &LogConfig) {
    let env_filter = filter_for(config);

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(format = ?config.format, "tracing initialized");
    }
}

fn filter_for(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        let config = LogConfig::default();
        init_tracing(&config);
        init_tracing(&LogConfig {
            format: LogFormat::Json,
            ..config
        });
    }
}
