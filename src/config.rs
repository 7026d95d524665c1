//! Policy configuration.
//!
//! The only behavioural switch is the environment name: exactly
//! `"production"` selects [`RuntimeMode::Production`]. The remaining knobs
//! size the request-body capture and the recent-error buffer.
//!
//! `PolicyConfig` deserializes with defaults for every field, so it can sit
//! inside a host application's own config file:
//!
//! ```rust
//! use wellsense_errors::{PolicyConfig, RuntimeMode};
//!
//! let cfg: PolicyConfig = serde_json::from_str(r#"{ "environment": "production" }"#).unwrap();
//! assert_eq!(cfg.mode(), RuntimeMode::Production);
//! assert_eq!(cfg.body_limit_bytes, 64 * 1024);
//! ```

use crate::{ErrorResponsePolicy, RingBufferSink, RuntimeMode, Tee, TracingSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Environment variable holding the environment name.
pub const MODE_ENV_VAR: &str = "NODE_ENV";

/// Environment name used when the variable is unset.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Settings for building an [`ErrorResponsePolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Environment name; `"production"` suppresses diagnostic detail.
    pub environment: String,
    /// Largest request body captured into diagnostics.
    pub body_limit_bytes: usize,
    /// Entries kept by the recent-error buffer.
    pub recent_capacity: usize,
    /// Byte budget per recent-error entry.
    pub recent_entry_bytes: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_owned(),
            body_limit_bytes: 64 * 1024,
            recent_capacity: 1000,
            recent_entry_bytes: 2048,
        }
    }
}

impl PolicyConfig {
    /// Defaults, with the environment name read from [`MODE_ENV_VAR`].
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(MODE_ENV_VAR).ok())
    }

    /// Defaults, with the environment name taken from `value` when present.
    pub fn from_env_value(value: Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(environment) = value {
            cfg.environment = environment;
        }
        cfg
    }

    /// Mode selected by `environment`.
    #[inline]
    pub fn mode(&self) -> RuntimeMode {
        RuntimeMode::from_env_value(Some(self.environment.as_str()))
    }

    /// Buffer sized by this config.
    pub fn recent_buffer(&self) -> RingBufferSink {
        RingBufferSink::new(self.recent_capacity, self.recent_entry_bytes)
    }

    /// Policy logging through `tracing` and into `recent`.
    pub fn build_policy(&self, recent: RingBufferSink) -> ErrorResponsePolicy {
        tracing::debug!(
            environment = %self.environment,
            mode = %self.mode(),
            recent_capacity = recent.capacity(),
            "building error response policy"
        );
        ErrorResponsePolicy::new(self.mode(), Arc::new(Tee::new(TracingSink, recent)))
    }
}
