//! Logging setup for the broker
//!
//! Maps the `-v` count onto a `tracing` level and installs a stderr
//! formatter. Each `-v` reveals one more layer of detail:
//!
//! - none: warnings and errors only (driver deaths, dropped clients)
//! - `-v`: connection lifecycle (accept, close, driver start/restart)
//! - `-vv`: one line per routed message
//! - `-vvv`: full XML of every message read or written
//!
//! # Environment Variables
//!
//! - `INDISERVER_LOG`: filter directive overriding the `-v` mapping
//! - `RUST_LOG`: used when `INDISERVER_LOG` is unset

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),
}

/// Level directive for a verbosity count
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize logging for the given verbosity
pub fn init_logging(verbosity: u8) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = create_env_filter(level_for_verbosity(verbosity));

    let subscriber = Registry::default()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 3)
                .with_thread_ids(false)
                .compact(),
        )
        .with(filter);

    subscriber
        .try_init()
        .map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Create an environment filter with fallback to default level
fn create_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(directive) = std::env::var("INDISERVER_LOG") {
        EnvFilter::new(directive)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}
