//! Configuration validation.

use crate::config::CompanionConfig;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Validate the entire configuration.
pub fn validate_config(config: &CompanionConfig) -> Result<(), ValidationError> {
    validate_scheme("companionUrl", &config.companion_url)?;
    validate_scheme("serverUrl", &config.server_url)?;
    validate_loopback(&config.companion_url)?;

    if config.request_timeout_ms == 0 {
        return Err(ValidationError::OutOfRange {
            field: "requestTimeoutMs".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.monitoring.check_interval_ms == 0 {
        return Err(ValidationError::OutOfRange {
            field: "monitoring.checkIntervalMs".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.monitoring.max_consecutive_errors == 0 {
        return Err(ValidationError::OutOfRange {
            field: "monitoring.maxConsecutiveErrors".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    debug!("Validated companion configuration");
    Ok(())
}

fn validate_scheme(field: &str, url: &Url) -> Result<(), ValidationError> {
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ValidationError::InvalidUrl {
            field: field.to_string(),
            reason: format!("Unsupported URL scheme: {} (expected http/https)", scheme),
        });
    }
    Ok(())
}

/// The companion service only ever listens on the local machine.
fn validate_loopback(url: &Url) -> Result<(), ValidationError> {
    let loopback = match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(address)) => address.is_loopback(),
        Some(Host::Ipv6(address)) => address.is_loopback(),
        None => false,
    };
    if !loopback {
        return Err(ValidationError::InvalidUrl {
            field: "companionUrl".to_string(),
            reason: format!("'{}' is not a loopback address", url.host_str().unwrap_or_default()),
        });
    }
    Ok(())
}

/// Errors that can occur during validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid URL for '{field}': {reason}")]
    InvalidUrl { field: String, reason: String },

    #[error("Invalid value for '{field}': {reason}")]
    OutOfRange { field: String, reason: String },
}
