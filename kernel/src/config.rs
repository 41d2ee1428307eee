// Catalog Configuration
//
// Loaded from JSON. Every section and field has a default, so an empty
// document `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::credentials::WriteScope;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub warehouse: WarehouseConfig,
    pub credentials: CredentialsConfig,
    pub metadata: MetadataConfig,
    pub purge: PurgeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Root under which new tables get `<namespace levels>/<name>`.
    pub location: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            location: "s3://warehouse".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub ttl_secs: u64,
    pub issuance_timeout_ms: u64,
    pub write_scope: WriteScope,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            issuance_timeout_ms: 5_000,
            write_scope: WriteScope::TableLocation,
        }
    }
}

impl CredentialsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn issuance_timeout(&self) -> Duration {
        Duration::from_millis(self.issuance_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Default cap on `metadata-log`, overridable per table with
    /// `write.metadata.previous-versions-max`.
    pub previous_versions_max: usize,
    /// Bound on writing one metadata file.
    pub write_timeout_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            previous_versions_max: 100,
            write_timeout_ms: 10_000,
        }
    }
}

impl MetadataConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub delete_timeout_ms: u64,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            delete_timeout_ms: 10_000,
            poll_attempts: 60,
            poll_interval_ms: 1_000,
        }
    }
}

impl PurgeConfig {
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl CatalogConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CatalogConfig::from_json("{}").unwrap();
        assert_eq!(config, CatalogConfig::default_config());
        assert_eq!(config.purge.poll_attempts, 60);
        assert_eq!(config.credentials.write_scope, WriteScope::TableLocation);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CatalogConfig::from_json(
            r#"{
              "warehouse": { "location": "s3://lake/wh" },
              "credentials": { "write_scope": "data-only" },
              "logging": { "format": "json" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.warehouse.location, "s3://lake/wh");
        assert_eq!(config.credentials.write_scope, WriteScope::DataOnly);
        assert_eq!(config.credentials.ttl_secs, 3600);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        assert!(matches!(
            CatalogConfig::from_json(r#"{ "purge": { "poll_attempts": "many" } }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
