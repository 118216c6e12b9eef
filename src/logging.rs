//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging control-point flow
//! across the orchestrator and worker processes. Log lines emitted while a
//! correlation id is in scope carry that id verbatim, so records from
//! concurrently executing units can be disambiguated.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::context;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Idempotent, and tolerant of a subscriber already installed by the host
/// process.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_env("RUNCTL_LOG")
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true);

        // try_init: the embedding process may already have a subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("RUNCTL_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for a control-point decision, with the current
/// correlation id attached.
pub fn log_control_point(point: &str, run_id: &str, detail: &str) {
    tracing::info!(
        control_point = %point,
        run_id = %run_id,
        correlation_id = %context::current(),
        detail = %detail,
        "📍 CONTROL_POINT"
    );
}
