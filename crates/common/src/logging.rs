//! Tracing subscriber initialisation.
//!
//! `RUST_LOG` always wins; otherwise the configured level is applied to the
//! hub crates.

use crate::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the fallback filter directive for the hub crates.
#[must_use]
pub fn default_directive(config: &ObservabilityConfig) -> String {
    let level = &config.log_level;
    format!("session_hub={level},relay_protocol={level}")
}

/// Install the global tracing subscriber.
///
/// Returns `false` if a global subscriber was already installed (common in
/// tests that initialise logging more than once).
pub fn init_tracing(config: &ObservabilityConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(config).into());

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.is_ok()
}
