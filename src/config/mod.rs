//! Environment-backed configuration.
//!
//! Every setting has a default. Override with `CASCADE_*` environment variables.

pub mod error;


pub use error::ConfigError;

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::Namespace;
use crate::constants::{DEFAULT_FLUSH_AFTER, DEFAULT_FLUSH_AFTER_EVENTS};
use crate::telemetry::BatcherConfig;

/// Server configuration loaded from environment variables.
///
/// Use [`Config::from_env`] to read `CASCADE_*` overrides on top of defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port. Default: `8080`.
    pub port: u16,

    /// IP address to bind to. Default: `127.0.0.1`.
    pub bind_addr: IpAddr,

    /// Root directory of the origin store. Default: `./.origin`.
    pub origin_root: PathBuf,

    /// Prefix of every distributed-tier key. Default: `cascade-content`.
    pub kv_prefix: String,

    /// Weighted capacity of the local tier in bytes. Default: 1 GiB.
    pub local_capacity_bytes: u64,

    /// Weighted capacity of the in-memory distributed tier in bytes. Default: 4 GiB.
    pub distributed_capacity_bytes: u64,

    /// Host (lowercase, without port) to namespace mapping.
    pub host_namespaces: HashMap<String, Namespace>,

    /// Namespace for hosts not in `host_namespaces`. Default: `IMAGES`.
    pub default_namespace: Namespace,

    /// Base URL of the telemetry ingest service.
    pub telemetry_url: String,

    /// Dataset receiving request telemetry.
    pub telemetry_dataset: Option<String>,

    /// Bearer credential for the telemetry sink. Without it events only go to the
    /// process log.
    pub telemetry_api_key: Option<String>,

    /// Telemetry time trigger. Default: 15 s.
    pub flush_after: Duration,

    /// Telemetry count trigger. Default: `100`.
    pub flush_after_events: usize,

    /// Deployment environment, attached to every event. Default: `development`.
    pub environment: String,
}

/// Default telemetry base URL used when `CASCADE_TELEMETRY_URL` is not set.
pub const DEFAULT_TELEMETRY_URL: &str = "https://api.axiom.co";

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            origin_root: PathBuf::from("./.origin"),
            kv_prefix: "cascade-content".to_string(),
            local_capacity_bytes: 1024 * 1024 * 1024,
            distributed_capacity_bytes: 4 * 1024 * 1024 * 1024,
            host_namespaces: HashMap::new(),
            default_namespace: Namespace::Images,
            telemetry_url: DEFAULT_TELEMETRY_URL.to_string(),
            telemetry_dataset: None,
            telemetry_api_key: None,
            flush_after: DEFAULT_FLUSH_AFTER,
            flush_after_events: DEFAULT_FLUSH_AFTER_EVENTS,
            environment: "development".to_string(),
        }
    }
}

impl Config {
    const ENV_PORT: &'static str = "CASCADE_PORT";
    const ENV_BIND_ADDR: &'static str = "CASCADE_BIND_ADDR";
    const ENV_ORIGIN_ROOT: &'static str = "CASCADE_ORIGIN_ROOT";
    const ENV_KV_PREFIX: &'static str = "CASCADE_KV_PREFIX";
    const ENV_LOCAL_CAPACITY: &'static str = "CASCADE_LOCAL_CAPACITY_BYTES";
    const ENV_DISTRIBUTED_CAPACITY: &'static str = "CASCADE_DISTRIBUTED_CAPACITY_BYTES";
    const ENV_HOST_NAMESPACES: &'static str = "CASCADE_HOST_NAMESPACES";
    const ENV_DEFAULT_NAMESPACE: &'static str = "CASCADE_DEFAULT_NAMESPACE";
    const ENV_TELEMETRY_URL: &'static str = "CASCADE_TELEMETRY_URL";
    const ENV_TELEMETRY_DATASET: &'static str = "CASCADE_TELEMETRY_DATASET";
    const ENV_TELEMETRY_API_KEY: &'static str = "CASCADE_TELEMETRY_API_KEY";
    const ENV_FLUSH_AFTER_MS: &'static str = "CASCADE_FLUSH_AFTER_MS";
    const ENV_FLUSH_AFTER_EVENTS: &'static str = "CASCADE_FLUSH_AFTER_EVENTS";
    const ENV_ENVIRONMENT: &'static str = "CASCADE_ENVIRONMENT";

    /// Loads configuration from environment variables (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = Self::parse_port_from_env(defaults.port)?;
        let bind_addr = Self::parse_bind_addr_from_env(defaults.bind_addr)?;
        let origin_root = Self::parse_path_from_env(Self::ENV_ORIGIN_ROOT, defaults.origin_root);
        let kv_prefix = Self::parse_string_from_env(Self::ENV_KV_PREFIX, defaults.kv_prefix);
        let local_capacity_bytes =
            Self::parse_u64_from_env(Self::ENV_LOCAL_CAPACITY, defaults.local_capacity_bytes);
        let distributed_capacity_bytes = Self::parse_u64_from_env(
            Self::ENV_DISTRIBUTED_CAPACITY,
            defaults.distributed_capacity_bytes,
        );
        let host_namespaces = match env::var(Self::ENV_HOST_NAMESPACES) {
            Ok(value) => parse_host_namespaces(&value)?,
            Err(_) => defaults.host_namespaces,
        };
        let default_namespace = match env::var(Self::ENV_DEFAULT_NAMESPACE) {
            Ok(value) => parse_namespace(&value)?,
            Err(_) => defaults.default_namespace,
        };
        let telemetry_url =
            Self::parse_string_from_env(Self::ENV_TELEMETRY_URL, defaults.telemetry_url);
        let telemetry_dataset = Self::parse_optional_string_from_env(Self::ENV_TELEMETRY_DATASET);
        let telemetry_api_key = Self::parse_optional_string_from_env(Self::ENV_TELEMETRY_API_KEY);
        let flush_after = Duration::from_millis(Self::parse_u64_from_env(
            Self::ENV_FLUSH_AFTER_MS,
            defaults.flush_after.as_millis() as u64,
        ));
        let flush_after_events = Self::parse_u64_from_env(
            Self::ENV_FLUSH_AFTER_EVENTS,
            defaults.flush_after_events as u64,
        ) as usize;
        let environment = Self::parse_string_from_env(Self::ENV_ENVIRONMENT, defaults.environment);

        Ok(Self {
            port,
            bind_addr,
            origin_root,
            kv_prefix,
            local_capacity_bytes,
            distributed_capacity_bytes,
            host_namespaces,
            default_namespace,
            telemetry_url,
            telemetry_dataset,
            telemetry_api_key,
            flush_after,
            flush_after_events,
            environment,
        })
    }

    /// Validates paths and basic invariants (does not create directories).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin_root.exists() && !self.origin_root.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.origin_root.clone(),
            });
        }

        if self.flush_after_events == 0 {
            return Err(ConfigError::InvalidValue {
                name: Self::ENV_FLUSH_AFTER_EVENTS,
                reason: "must be at least 1".to_string(),
            });
        }

        if self.flush_after.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: Self::ENV_FLUSH_AFTER_MS,
                reason: "must be at least 1".to_string(),
            });
        }

        if self.telemetry_api_key.is_some() && self.telemetry_dataset.is_none() {
            return Err(ConfigError::MissingEnvVar {
                name: Self::ENV_TELEMETRY_DATASET,
            });
        }

        Ok(())
    }

    /// Returns `"{bind_addr}:{port}"` (useful for logging/binding).
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Namespace served for a `Host` header value. Port and case are ignored.
    pub fn namespace_for_host(&self, host: &str) -> Namespace {
        let host = host.trim().to_ascii_lowercase();
        let name = host.split(':').next().unwrap_or_default();
        self.host_namespaces
            .get(name)
            .copied()
            .unwrap_or(self.default_namespace)
    }

    /// Whether events are shipped to the remote sink.
    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry_api_key.is_some() && self.telemetry_dataset.is_some()
    }

    /// Batcher settings with the base tags every event carries.
    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            flush_after: self.flush_after,
            flush_after_events: self.flush_after_events,
            ..BatcherConfig::default()
        }
        .with_tag("server", "cascade")
        .with_tag("source", self.kv_prefix.as_str())
        .with_tag("handler", "fetch")
        .with_tag("env", self.environment.as_str())
    }

    fn parse_port_from_env(default: u16) -> Result<u16, ConfigError> {
        match env::var(Self::ENV_PORT) {
            Ok(value) => {
                let port: u16 = value.parse().map_err(|e| ConfigError::PortParseError {
                    value: value.clone(),
                    source: e,
                })?;

                if port == 0 {
                    return Err(ConfigError::InvalidPort { value });
                }

                Ok(port)
            }
            Err(_) => Ok(default),
        }
    }

    fn parse_bind_addr_from_env(default: IpAddr) -> Result<IpAddr, ConfigError> {
        match env::var(Self::ENV_BIND_ADDR) {
            Ok(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidBindAddr { value, source: e }),
            Err(_) => Ok(default),
        }
    }

    fn parse_path_from_env(var_name: &str, default: PathBuf) -> PathBuf {
        env::var(var_name).map(PathBuf::from).unwrap_or(default)
    }

    fn parse_optional_string_from_env(var_name: &str) -> Option<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_string_from_env(var_name: &str, default: String) -> String {
        env::var(var_name).unwrap_or(default)
    }

    fn parse_u64_from_env(var_name: &str, default: u64) -> u64 {
        env::var(var_name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

fn parse_namespace(value: &str) -> Result<Namespace, ConfigError> {
    value
        .parse()
        .map_err(|reason| ConfigError::InvalidNamespace {
            value: value.to_string(),
            reason,
        })
}

/// Parses `host=NAMESPACE` pairs separated by commas. Empty items are ignored.
fn parse_host_namespaces(value: &str) -> Result<HashMap<String, Namespace>, ConfigError> {
    let mut mapping = HashMap::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (host, namespace) = item
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidHostMapping {
                entry: item.to_string(),
            })?;
        let host = host.trim().to_ascii_lowercase();
        if host.is_empty() {
            return Err(ConfigError::InvalidHostMapping {
                entry: item.to_string(),
            });
        }
        mapping.insert(host, parse_namespace(namespace)?);
    }
    Ok(mapping)
}
