//! Runtime Configuration
//!
//! A small process-wide settings block. It is read on hot-ish paths (every
//! flush reads the recursion limit) so it sits behind a `parking_lot` lock
//! and is copied out rather than borrowed.

use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Settings that change runtime behavior rather than semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Emit developer warnings (readonly writes, hooks outside setup, ...).
    pub dev_mode: bool,

    /// How many times one job may run in a single flush before it is
    /// treated as an infinite update loop.
    pub recursion_limit: usize,

    /// Log errors that no `on_error_captured` hook or global handler took.
    pub log_unhandled_errors: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dev_mode: cfg!(debug_assertions),
            recursion_limit: 100,
            log_unhandled_errors: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

fn config() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::default()))
}

/// Replace the active configuration.
pub fn install(new: RuntimeConfig) {
    tracing::debug!(?new, "installing runtime config");
    *config().write() = new;
}

/// A copy of the active configuration.
pub fn current() -> RuntimeConfig {
    config().read().clone()
}

pub fn dev_mode() -> bool {
    config().read().dev_mode
}

pub fn recursion_limit() -> usize {
    config().read().recursion_limit
}

/// `tracing::warn!` that only fires in dev mode.
macro_rules! dev_warn {
    ($($arg:tt)+) => {
        if $crate::config::dev_mode() {
            tracing::warn!($($arg)+);
        }
    };
}

pub(crate) use dev_warn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_debug_builds() {
        let config = RuntimeConfig::default();
        assert_eq!(config.dev_mode, cfg!(debug_assertions));
        assert_eq!(config.recursion_limit, 100);
        assert!(config.log_unhandled_errors);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json_str(r#"{ "recursion_limit": 5 }"#).unwrap();
        assert_eq!(config.recursion_limit, 5);
        assert!(config.log_unhandled_errors);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(RuntimeConfig::from_json_str(r#"{ "recursion_limit": "many" }"#).is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = RuntimeConfig {
            dev_mode: false,
            recursion_limit: 10,
            log_unhandled_errors: false,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RuntimeConfig::from_json_str(&json).unwrap(), config);
    }
}
