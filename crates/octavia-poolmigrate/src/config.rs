//! Configuration file support for poolmigrate
//!
//! Loads and validates settings from an optional TOML file. Command-line
//! flags are applied on top with [`MigratorConfig::apply_overrides`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settle::{SettleConfig, DEFAULT_TIMEOUT_RETRIES};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Settle waiter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleSection {
    /// Seconds between provisioning status checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait for ACTIVE before timing out
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How many times a timed-out wait is restarted
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,
}

/// Control-plane client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Octavia endpoint; skips the catalog lookup when set
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Catalog interface (public, internal, admin)
    #[serde(default)]
    pub interface: Option<String>,

    /// Catalog region
    #[serde(default)]
    pub region: Option<String>,
}

/// Complete poolmigrate configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    #[serde(default)]
    pub settle: SettleSection,

    #[serde(default)]
    pub client: ClientSection,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub poll_interval_secs: Option<u64>,
    pub settle_timeout_secs: Option<u64>,
    pub settle_retries: Option<u32>,
    pub endpoint: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_timeout_retries() -> u32 {
    DEFAULT_TIMEOUT_RETRIES
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SettleSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            timeout_retries: default_timeout_retries(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            endpoint: None,
            interface: None,
            region: None,
        }
    }
}

impl MigratorConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` if given, otherwise returns defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(secs) = overrides.poll_interval_secs {
            self.settle.poll_interval_secs = secs;
        }
        if let Some(secs) = overrides.settle_timeout_secs {
            self.settle.timeout_secs = secs;
        }
        if let Some(retries) = overrides.settle_retries {
            self.settle.timeout_retries = retries;
        }
        if let Some(endpoint) = &overrides.endpoint {
            self.client.endpoint = Some(endpoint.clone());
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settle.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "settle.poll_interval_secs",
                message: "must be > 0".to_string(),
            });
        }

        if self.settle.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "settle.timeout_secs",
                message: "must be > 0".to_string(),
            });
        }

        if self.settle.poll_interval_secs > self.settle.timeout_secs {
            return Err(ConfigError::Invalid {
                field: "settle.poll_interval_secs",
                message: format!(
                    "must not exceed settle.timeout_secs ({})",
                    self.settle.timeout_secs
                ),
            });
        }

        if self.client.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "client.request_timeout_secs",
                message: "must be > 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn settle_config(&self) -> SettleConfig {
        SettleConfig {
            poll_interval: Duration::from_secs(self.settle.poll_interval_secs),
            timeout: Duration::from_secs(self.settle.timeout_secs),
            timeout_retries: self.settle.timeout_retries,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MigratorConfig::default();
        assert_eq!(config.settle_config(), SettleConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[settle]
poll_interval_secs = 5

[client]
region = "RegionTwo"
"#;
        let config: MigratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.settle.poll_interval_secs, 5);
        assert_eq!(config.client.region.as_deref(), Some("RegionTwo"));
        // Unspecified values should use defaults
        assert_eq!(config.settle.timeout_secs, 300);
        assert_eq!(config.settle.timeout_retries, 1);
        assert_eq!(config.client.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[settle]\ntimeout_secs = 60\ntimeout_retries = 0").unwrap();

        let config = MigratorConfig::load(file.path()).unwrap();
        assert_eq!(config.settle.timeout_secs, 60);
        assert_eq!(config.settle.timeout_retries, 0);
    }

    #[test]
    fn test_load_errors() {
        let err = MigratorConfig::load("/nonexistent/poolmigrate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[settle]\npoll_interval_secs = \"fast\"").unwrap();
        let err = MigratorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_or_default_without_path() {
        assert_eq!(
            MigratorConfig::load_or_default(None).unwrap(),
            MigratorConfig::default()
        );
    }

    #[test]
    fn test_overrides_win() {
        let mut config = MigratorConfig::default();
        config.apply_overrides(&ConfigOverrides {
            poll_interval_secs: Some(1),
            settle_timeout_secs: Some(10),
            settle_retries: None,
            endpoint: Some("https://lb.example:9876".to_string()),
        });

        assert_eq!(config.settle.poll_interval_secs, 1);
        assert_eq!(config.settle.timeout_secs, 10);
        assert_eq!(config.settle.timeout_retries, 1);
        assert_eq!(config.client.endpoint.as_deref(), Some("https://lb.example:9876"));
    }

    #[test]
    fn test_validate_rejects_bad_settle_values() {
        let mut config = MigratorConfig::default();
        config.settle.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = MigratorConfig::default();
        config.settle.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = MigratorConfig::default();
        config.settle.poll_interval_secs = 10;
        config.settle.timeout_secs = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("settle.poll_interval_secs"));
    }
}
