//! Configuration schema definitions.
//!
//! This module defines the complete settings structure for the gateway.
//! All types derive Serde traits for deserialization from the TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Admission callback endpoint.
    pub oracle: OracleConfig,

    /// Where and how the proxy configuration is compiled.
    pub proxy: ProxySettings,

    /// Controlled proxy process.
    pub supervisor: SupervisorConfig,

    /// Fire-and-forget counter writes.
    pub counters: CounterConfig,

    /// Routing state source.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Admission oracle listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Deadline for a single store lookup in milliseconds.
    pub lookup_timeout_ms: u64,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 5,
            lookup_timeout_ms: 2000,
            tls: None,
        }
    }
}

impl OracleConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// TLS configuration for the oracle listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Compiler output and naming settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Filesystem prefix of the controlled proxy.
    pub prefix: PathBuf,

    /// Stream context output file, relative to `prefix` unless absolute.
    pub stream_config: PathBuf,

    /// HTTP context output file, relative to `prefix` unless absolute.
    pub http_config: PathBuf,

    /// Script providing the admission hook.
    pub js_import: String,

    /// Hook invoked on every stream connection.
    pub access_hook: String,

    /// Prefix for generated upstream group names.
    pub upstream_prefix: String,

    /// Static resource served when no upstream is reachable.
    pub error_page_uri: String,

    /// Variable carrying the listener id to the hook.
    pub listen_id_variable: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("/opt/app/nginx"),
            stream_config: PathBuf::from("conf/stream.conf"),
            http_config: PathBuf::from("conf/http.conf"),
            js_import: "/opt/app/nginx/dist/njs.js".to_string(),
            access_hook: "njs.accessAddressStream".to_string(),
            upstream_prefix: "ffus_".to_string(),
            error_page_uri: "/bad_gateway.html".to_string(),
            listen_id_variable: "$ff_listen_id".to_string(),
        }
    }
}

impl ProxySettings {
    /// Resolve a path against the proxy prefix.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.prefix.join(path)
        }
    }

    pub fn stream_path(&self) -> PathBuf {
        self.resolve(&self.stream_config)
    }

    pub fn http_path(&self) -> PathBuf {
        self.resolve(&self.http_config)
    }
}

/// Controlled proxy process settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Proxy binary.
    pub binary: PathBuf,

    /// Prefix passed with `-p`.
    pub prefix: PathBuf,

    /// Main configuration passed with `-c`; it includes the compiled files.
    pub main_config: PathBuf,

    /// Pid file that must appear before the process counts as live.
    pub pid_file: Option<PathBuf>,

    /// Liveness probe deadline in seconds.
    pub start_timeout_secs: u64,

    /// Drain deadline before force-kill in seconds.
    pub stop_timeout_secs: u64,

    /// Liveness probe poll interval in milliseconds.
    pub probe_interval_ms: u64,

    /// Run the proxy's config test before signalling a reload.
    pub test_before_reload: bool,

    /// Replaces the generated argument list when set.
    pub args: Option<Vec<String>>,

    /// Replaces the generated config-test argument list when set.
    pub test_args: Option<Vec<String>>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/nginx"),
            prefix: PathBuf::from("/opt/app/nginx"),
            main_config: PathBuf::from("conf/nginx.conf"),
            pid_file: None,
            start_timeout_secs: 10,
            stop_timeout_secs: 15,
            probe_interval_ms: 100,
            test_before_reload: true,
            args: None,
            test_args: None,
        }
    }
}

impl SupervisorConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Retry and queueing for counter updates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Pending updates held before new ones are dropped.
    pub queue_capacity: usize,

    /// Attempts per update, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

/// Routing state source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot seeding the in-process store.
    pub snapshot_path: Option<PathBuf>,

    /// Recompile when the snapshot file changes.
    pub watch: bool,

    /// Write counters back to the snapshot on shutdown.
    pub persist_on_shutdown: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            watch: true,
            persist_on_shutdown: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [oracle]
            bind_address = "0.0.0.0:3001"

            [proxy]
            prefix = "/srv/proxy"
            "#,
        )
        .unwrap();

        assert_eq!(config.oracle.bind_address, "0.0.0.0:3001");
        assert_eq!(config.oracle.lookup_timeout_ms, 2000);
        assert_eq!(config.proxy.upstream_prefix, "ffus_");
        assert_eq!(config.proxy.stream_path(), PathBuf::from("/srv/proxy/conf/stream.conf"));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_absolute_output_path_ignores_prefix() {
        let settings = ProxySettings {
            http_config: PathBuf::from("/etc/proxy/http.conf"),
            ..ProxySettings::default()
        };
        assert_eq!(settings.http_path(), PathBuf::from("/etc/proxy/http.conf"));
    }
}
