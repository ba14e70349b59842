//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (drain timeout > 0, buckets ascending)
//! - Check that addresses and networks parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;
use crate::http::client_ip::IpNetwork;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a host:port address")]
    BindAddress(String),
    #[error("listener.drain_timeout_ms must be greater than zero")]
    ZeroDrainTimeout,
    #[error("proxy.trusted_network {0:?} is not a network")]
    TrustedNetwork(String),
    #[error("observability.histogram_buckets must not be empty")]
    EmptyBuckets,
    #[error("observability.histogram_buckets must be strictly ascending")]
    UnsortedBuckets,
    #[error("observability.{0} contains an empty entry")]
    EmptySkipEntry(&'static str),
}

/// `ip:port`, `[ipv6]:port` or `hostname:port`. Host names are resolved at
/// bind time, not here.
fn is_bind_address(addr: &str) -> bool {
    if addr.parse::<SocketAddr>().is_ok() {
        return true;
    }
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    port.parse::<u16>().is_ok()
        && !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_bind_address(&config.listener.bind_address) {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.drain_timeout_ms == 0 {
        errors.push(ValidationError::ZeroDrainTimeout);
    }
    if config.proxy.trusted_network.parse::<IpNetwork>().is_err() {
        errors.push(ValidationError::TrustedNetwork(
            config.proxy.trusted_network.clone(),
        ));
    }

    let buckets = &config.observability.histogram_buckets;
    if buckets.is_empty() {
        errors.push(ValidationError::EmptyBuckets);
    } else if buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::UnsortedBuckets);
    }

    if config.observability.log_skip_paths.iter().any(String::is_empty) {
        errors.push(ValidationError::EmptySkipEntry("log_skip_paths"));
    }
    // An empty prefix would match every path.
    if config
        .observability
        .metrics_skip_prefixes
        .iter()
        .any(String::is_empty)
    {
        errors.push(ValidationError::EmptySkipEntry("metrics_skip_prefixes"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
