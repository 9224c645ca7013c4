//! Logging configuration using tracing
//!
//! Structured logging to stderr with support for the RUST_LOG environment variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// Sets up structured logging with:
/// - Filtering via RUST_LOG (defaults to `default_level`, e.g. "info" for the daemon)
/// - Formatted output to stderr with targets, thread ids and line numbers
///
/// # Example RUST_LOG values
/// - `RUST_LOG=debug` - Show every remote call
/// - `RUST_LOG=hashi::sync=trace` - Trace the reconciler and orchestrator only
/// - `RUST_LOG=hashi=debug,asana=info` - Different levels per crate
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init(default_level: &str) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| crate::HashiError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init("debug");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_helper() {
        init_test();
        init_test();
    }

    #[test]
    fn test_second_init_reports_error() {
        init_test();
        assert!(init("info").is_err());
    }
}
