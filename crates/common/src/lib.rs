//! Common utilities and types shared across the session hub crates.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for tracing subscriber initialisation
pub mod logging;
