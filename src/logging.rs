//! # Structured Logging
//!
//! Environment-aware tracing initialization. Plain console output in
//! development, JSON in production, `RUST_LOG`-style filtering everywhere.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process. Safe to call from tests
/// and embedding hosts; an already-installed global subscriber is left alone.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));

        let result = if environment == "production" {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true))
                .with(filter)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(filter)
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}

/// Detect the runtime environment from conventional variables.
pub fn detect_environment() -> String {
    std::env::var("ORCHESTRA_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
