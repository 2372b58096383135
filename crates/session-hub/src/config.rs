//! Session hub configuration.
//!
//! Configuration is loaded from environment variables. Every variable has a
//! default; a present but unparsable value is an error rather than being
//! silently replaced.

use crate::communication::Topology;
use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use relay_protocol::CHUNK_THRESHOLD;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default cap on one connection's partial chunk payload (16 MiB).
pub const DEFAULT_MAX_REASSEMBLY_BYTES: usize = 16 * 1024 * 1024;

/// Default age after which a partial chunk payload is discarded.
pub const DEFAULT_REASSEMBLY_TIMEOUT_SECONDS: u64 = 30;

/// Default number of media bytes accumulated before header extraction.
pub const DEFAULT_MEDIA_HEADER_PROBE_BYTES: usize = 2048;

/// How the messages of one received batch are handed to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One task per message; no ordering between messages of a batch.
    #[default]
    Concurrent,
    /// Messages are handled one after another in batch order.
    Sequential,
}

impl FromStr for DispatchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(DispatchMode::Concurrent),
            "sequential" => Ok(DispatchMode::Sequential),
            _ => Err(()),
        }
    }
}

/// Session hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Topology of sessions created for connections without a session.
    pub topology: Topology,

    /// Outgoing frames at or above this many characters are chunked.
    pub chunk_threshold: usize,

    /// Cap on one connection's partial chunk payload.
    pub max_reassembly_bytes: usize,

    /// Partial chunk payloads older than this are discarded.
    pub reassembly_timeout: Duration,

    /// Media bytes accumulated per stream before header extraction runs.
    pub media_header_probe_bytes: usize,

    /// Per-batch dispatch strategy.
    pub dispatch_mode: DispatchMode,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            topology: Topology::ManyToMany,
            chunk_threshold: CHUNK_THRESHOLD,
            max_reassembly_bytes: DEFAULT_MAX_REASSEMBLY_BYTES,
            reassembly_timeout: Duration::from_secs(DEFAULT_REASSEMBLY_TIMEOUT_SECONDS),
            media_header_probe_bytes: DEFAULT_MEDIA_HEADER_PROBE_BYTES,
            dispatch_mode: DispatchMode::Concurrent,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse `name` from `vars`, falling back to `default` when absent.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        None => Ok(default),
    }
}

impl HubConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let topology = parse_var(vars, "HUB_TOPOLOGY", Topology::ManyToMany)?;

        let chunk_threshold = parse_var(vars, "HUB_CHUNK_THRESHOLD", CHUNK_THRESHOLD)?;
        if chunk_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "HUB_CHUNK_THRESHOLD".to_string(),
            ));
        }

        let max_reassembly_bytes = parse_var(
            vars,
            "HUB_MAX_REASSEMBLY_BYTES",
            DEFAULT_MAX_REASSEMBLY_BYTES,
        )?;

        let reassembly_timeout_seconds = parse_var(
            vars,
            "HUB_REASSEMBLY_TIMEOUT_SECONDS",
            DEFAULT_REASSEMBLY_TIMEOUT_SECONDS,
        )?;

        let media_header_probe_bytes = parse_var(
            vars,
            "HUB_MEDIA_HEADER_PROBE_BYTES",
            DEFAULT_MEDIA_HEADER_PROBE_BYTES,
        )?;

        let dispatch_mode = parse_var(vars, "HUB_DISPATCH_MODE", DispatchMode::Concurrent)?;

        let json_logs = parse_var(vars, "HUB_LOG_JSON", false)?;
        let log_level = vars
            .get("HUB_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(HubConfig {
            topology,
            chunk_threshold,
            max_reassembly_bytes,
            reassembly_timeout: Duration::from_secs(reassembly_timeout_seconds),
            media_header_probe_bytes,
            dispatch_mode,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}
