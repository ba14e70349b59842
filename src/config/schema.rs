//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::metrics::DEFAULT_BUCKETS;

/// Root configuration for an instrumented service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, drain timeout).
    pub listener: ListenerConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Reverse proxy trusted for client-IP resolution.
    pub proxy: ProxyConfig,

    /// Failure recovery settings.
    pub recovery: RecoveryConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// How long in-flight requests may run after a shutdown signal.
    pub drain_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            drain_timeout_ms: 5_000,
        }
    }
}

impl ListenerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Deployment environment. `"production"` switches logs to JSON at info.
    pub environment: String,

    /// Log level (trace, debug, info, warn, error). Derived from the
    /// environment when unset.
    pub log_level: Option<String>,

    /// Request paths never written to the access log (exact match).
    pub log_skip_paths: Vec<String>,

    /// Prefix for metric names; empty for none.
    pub metrics_namespace: String,

    /// Resolved paths starting with any of these are not measured.
    pub metrics_skip_prefixes: Vec<String>,

    /// Upper bounds of the duration histogram, in seconds, ascending.
    pub histogram_buckets: Vec<f64>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: None,
            log_skip_paths: vec!["/ping".to_string()],
            metrics_namespace: String::new(),
            metrics_skip_prefixes: vec!["/metrics".to_string(), "/ping".to_string()],
            histogram_buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

impl ObservabilityConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Trusted reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// CIDR of the one proxy allowed to supply client-IP headers.
    pub trusted_network: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            trusted_network: "127.0.0.0/8".to_string(),
        }
    }
}

/// Failure recovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Largest request body captured in failure dumps, in bytes. 0 disables.
    pub dump_body_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            dump_body_limit: 64 * 1024,
        }
    }
}
