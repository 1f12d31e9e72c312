//! Loading declared connections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConduitError, Result};
use crate::models::{ConnectionConfig, ConnectionSet, RateLimiterSpec};

/// Source of the declared connection set.
pub trait ConnectionConfigLoader: Send + Sync {
    fn load_connection_config(&self) -> Result<ConnectionSet>;
}

/// One `[connection.<name>]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionEntry {
    plugin: String,
    #[serde(default)]
    config: Option<toml::Table>,
    #[serde(default)]
    connections: Vec<String>,
    #[serde(default)]
    limiters: Vec<RateLimiterSpec>,
}

#[derive(Debug, Deserialize)]
struct ConnectionFile {
    #[serde(default)]
    connection: BTreeMap<String, ConnectionEntry>,
}

/// Reads connections from a TOML file:
///
/// ```toml
/// [connection.aws_prod]
/// plugin = "aws"
///
/// [connection.aws_prod.config]
/// regions = ["us-east-1"]
/// ```
///
/// A missing file declares no connections.
#[derive(Debug, Clone)]
pub struct TomlConnectionLoader {
    path: PathBuf,
}

impl TomlConnectionLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses declarations from TOML text.
    pub fn parse(contents: &str) -> Result<ConnectionSet> {
        let file: ConnectionFile = toml::from_str(contents).map_err(|e| {
            ConduitError::invalid_input("connection config").with_reason(e.to_string())
        })?;
        let configs = file
            .connection
            .into_iter()
            .map(|(name, entry)| {
                let config = match entry.config {
                    Some(table) => serde_json::to_value(table)?,
                    None => serde_json::Value::Object(serde_json::Map::new()),
                };
                Ok(ConnectionConfig {
                    name,
                    plugin: entry.plugin,
                    config,
                    connections: entry.connections,
                    limiters: entry.limiters,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        ConnectionSet::from_configs(configs)
    }
}

impl ConnectionConfigLoader for TomlConnectionLoader {
    fn load_connection_config(&self) -> Result<ConnectionSet> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no connection config at {}", self.path.display());
                Ok(ConnectionSet::new())
            }
            Err(e) => Err(ConduitError::file_system(&self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_connections() {
        let set = TomlConnectionLoader::parse(
            r#"
            [connection.aws_prod]
            plugin = "aws"

            [connection.aws_prod.config]
            regions = ["us-east-1", "eu-west-1"]

            [[connection.aws_prod.limiters]]
            name = "describe"
            bucket_size = 10
            fill_rate = 5.0

            [connection.aws_all]
            plugin = "aws"
            connections = ["aws_prod"]
            "#,
        )
        .expect("valid config");

        assert_eq!(set.len(), 2);
        let prod = set.get("aws_prod").expect("aws_prod");
        assert_eq!(prod.config, json!({"regions": ["us-east-1", "eu-west-1"]}));
        assert_eq!(prod.limiters[0].bucket_size, Some(10));
        assert!(set.get("aws_all").expect("aws_all").is_aggregator());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let err = TomlConnectionLoader::parse("[connection.Bad-Name]\nplugin = \"aws\"\n").unwrap_err();
        assert!(matches!(err, ConduitError::InvalidInput { .. }));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let err = TomlConnectionLoader::parse(
            "[connection.a]\nplugin = \"x\"\n[connection.a]\nplugin = \"y\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConduitError::InvalidInput { .. }));
    }

    #[test]
    fn test_missing_file_declares_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let loader = TomlConnectionLoader::new(dir.path().join("connections.toml"));
        assert!(loader.load_connection_config().expect("load").is_empty());
    }
}
