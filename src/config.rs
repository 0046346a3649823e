//! Service configuration
//!
//! Settings come from built-in defaults, an optional JSON file and
//! `NEUROFLEX_*` environment variables, applied in that order.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default upstream session API
pub const DEFAULT_UPSTREAM_URL: &str = "https://f13h4cz6id.execute-api.sa-east-1.amazonaws.com";

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 5000;

/// Timeout for upstream GET requests (seconds)
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// Timeout for upstream POST requests (seconds)
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

/// Environment variable names
pub const ENV_HOST: &str = "NEUROFLEX_HOST";
pub const ENV_PORT: &str = "NEUROFLEX_PORT";
pub const ENV_UPSTREAM_URL: &str = "NEUROFLEX_UPSTREAM_URL";
pub const ENV_READ_TIMEOUT: &str = "NEUROFLEX_READ_TIMEOUT_SECS";
pub const ENV_WRITE_TIMEOUT: &str = "NEUROFLEX_WRITE_TIMEOUT_SECS";
pub const ENV_MODEL_PATHS: &str = "NEUROFLEX_MODEL_PATHS";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),

    #[error("Timeout '{0}' must be greater than zero")]
    InvalidTimeout(&'static str),
}

/// Runtime configuration for the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Candidate model artifacts, tried in order
    pub model_paths: Vec<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upstream_base_url: DEFAULT_UPSTREAM_URL.to_string(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            model_paths: vec![
                PathBuf::from("models/cognitive_model.bin"),
                PathBuf::from("models/cognitive_model.json"),
            ],
        }
    }
}

impl ServiceConfig {
    /// Load defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.apply_env())
    }

    /// Read a JSON config file; absent fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: ServiceConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.upstream_base_url = trim_base_url(&config.upstream_base_url);
        Ok(config)
    }

    /// Apply `NEUROFLEX_*` environment overrides
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = parse_env(&lookup, ENV_PORT) {
            self.port = port;
        }
        if let Some(url) = lookup(ENV_UPSTREAM_URL) {
            self.upstream_base_url = trim_base_url(&url);
        }
        if let Some(secs) = parse_env(&lookup, ENV_READ_TIMEOUT) {
            self.read_timeout_secs = secs;
        }
        if let Some(secs) = parse_env(&lookup, ENV_WRITE_TIMEOUT) {
            self.write_timeout_secs = secs;
        }
        if let Some(paths) = lookup(ENV_MODEL_PATHS) {
            self.model_paths = paths
                .split(':')
                .filter(|p| !p.trim().is_empty())
                .map(|p| PathBuf::from(p.trim()))
                .collect();
        }
        self
    }

    /// Check the values that can only be wrong at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.upstream_base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUpstreamUrl(url.clone()));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("read_timeout_secs"));
        }
        if self.write_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("write_timeout_secs"));
        }
        self.bind_addr().map(|_| ())
    }

    /// Resolve `host` (IP literal or hostname) and `port` to a bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidBindAddress(format!("{}:{}", self.host, self.port)))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.write_timeout(), Duration::from_secs(30));
        assert_eq!(config.bind_addr().unwrap().port(), 5000);
    }

    #[test]
    fn test_env_overrides() {
        let config = ServiceConfig::default().apply_overrides(lookup_from(&[
            (ENV_PORT, "8080"),
            (ENV_UPSTREAM_URL, "http://localhost:9000/"),
            (ENV_MODEL_PATHS, "a.bin: b.json"),
        ]));

        assert_eq!(config.port, 8080);
        assert_eq!(config.upstream_base_url, "http://localhost:9000");
        assert_eq!(
            config.model_paths,
            vec![PathBuf::from("a.bin"), PathBuf::from("b.json")]
        );
    }

    #[test]
    fn test_unparsable_env_is_ignored() {
        let config = ServiceConfig::default()
            .apply_overrides(lookup_from(&[(ENV_READ_TIMEOUT, "soon")]));
        assert_eq!(config.read_timeout_secs, DEFAULT_READ_TIMEOUT_SECS);
    }

    #[test]
    fn test_partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 7000, "upstream_base_url": "https://api.example.com/"}}"#)
            .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.upstream_base_url, "https://api.example.com");
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ServiceConfig {
            upstream_base_url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUpstreamUrl(_))
        ));

        let config = ServiceConfig {
            write_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout("write_timeout_secs"))
        ));

        let config = ServiceConfig {
            host: "not a host".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.bind_addr(),
            Err(ConfigError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_bind_addr_accepts_ipv6_and_hostnames() {
        let config = ServiceConfig {
            host: "::".into(),
            port: 8080,
            ..Default::default()
        };
        let addr = config.bind_addr().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 8080);

        let config = ServiceConfig {
            host: "localhost".into(),
            ..Default::default()
        };
        let addr = config.bind_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), DEFAULT_PORT);
    }
}
