/*!
 * Logging functionality for spalink.
 *
 * This module provides tracing setup and utilities for consistent logging
 * across the spalink crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "spalink=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a spa session
///
/// # Arguments
///
/// * `spa` - The textual spa identifier
pub fn session_span(spa: &str) -> Span {
    tracing::info_span!("session", spa = %spa)
}

/// Create a new span for a protocol exchange
///
/// # Arguments
///
/// * `kind` - The message kind of the exchange
/// * `seq` - The sequence number of the exchange
pub fn exchange_span(kind: &str, seq: u8) -> Span {
    tracing::debug_span!("exchange", kind = %kind, seq = seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // This will fail if called multiple times in the same process
        // but it's fine for a single test
        let _ = init();
    }

    #[test]
    fn test_session_span() {
        let span = session_span("SPA0001");
        assert!(span.is_none()); // Span is not entered so is_none() should be true
    }

    #[test]
    fn test_exchange_span() {
        let span = exchange_span("Version", 3);
        assert!(span.is_none());
    }
}
