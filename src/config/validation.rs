//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function apart from the TLS file existence check
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use crate::config::schema::GatewayConfig;

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

/// Check settings that serde accepts but the gateway cannot run with.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ConfigValidationError>> {
    let mut errors = Vec::new();

    if config.oracle.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ConfigValidationError::new(
            "oracle.bind_address",
            format!("'{}' is not a socket address", config.oracle.bind_address),
        ));
    }
    if config.oracle.request_timeout_secs == 0 {
        errors.push(ConfigValidationError::new("oracle.request_timeout_secs", "must be > 0"));
    }
    if config.oracle.lookup_timeout_ms == 0 {
        errors.push(ConfigValidationError::new("oracle.lookup_timeout_ms", "must be > 0"));
    }
    if let Some(tls) = &config.oracle.tls {
        for (field, path) in [("oracle.tls.cert_path", &tls.cert_path), ("oracle.tls.key_path", &tls.key_path)] {
            if !Path::new(path).is_file() {
                errors.push(ConfigValidationError::new(field, format!("'{path}' does not exist")));
            }
        }
    }

    if config.proxy.upstream_prefix.trim().is_empty() {
        errors.push(ConfigValidationError::new("proxy.upstream_prefix", "must not be empty"));
    }
    if config.proxy.stream_path() == config.proxy.http_path() {
        errors.push(ConfigValidationError::new(
            "proxy.http_config",
            "stream and http output must be different files",
        ));
    }
    if !config.proxy.listen_id_variable.starts_with('$') {
        errors.push(ConfigValidationError::new("proxy.listen_id_variable", "must start with '$'"));
    }

    if config.supervisor.start_timeout_secs == 0 {
        errors.push(ConfigValidationError::new("supervisor.start_timeout_secs", "must be > 0"));
    }
    if config.supervisor.stop_timeout_secs == 0 {
        errors.push(ConfigValidationError::new("supervisor.stop_timeout_secs", "must be > 0"));
    }
    if config.supervisor.probe_interval_ms == 0 {
        errors.push(ConfigValidationError::new("supervisor.probe_interval_ms", "must be > 0"));
    }

    if config.counters.queue_capacity == 0 {
        errors.push(ConfigValidationError::new("counters.queue_capacity", "must be > 0"));
    }
    if config.counters.max_attempts == 0 {
        errors.push(ConfigValidationError::new("counters.max_attempts", "must be > 0"));
    }
    if config.counters.base_delay_ms > config.counters.max_delay_ms {
        errors.push(ConfigValidationError::new(
            "counters.base_delay_ms",
            "must not exceed counters.max_delay_ms",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ConfigValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_same_output_file_rejected() {
        let mut config = GatewayConfig::default();
        config.proxy.http_config = PathBuf::from("conf/stream.conf");
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "proxy.http_config");
    }

    #[test]
    fn test_missing_tls_files_rejected() {
        let mut config = GatewayConfig::default();
        config.oracle.tls = Some(TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let mut config = GatewayConfig::default();
        config.proxy.upstream_prefix = " ".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "proxy.upstream_prefix: must not be empty");
    }
}
