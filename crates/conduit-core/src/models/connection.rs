//! Declared connection model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, Result};

/// Longest identifier the engine accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Rate limiter declared for a connection's plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimiterSpec {
    pub name: String,
    /// Tokens added per second
    #[serde(default)]
    pub fill_rate: Option<f64>,
    #[serde(default)]
    pub bucket_size: Option<u64>,
    #[serde(default)]
    pub max_concurrency: Option<u64>,
    /// Scope tags the limiter is keyed by
    #[serde(default)]
    pub scope: Vec<String>,
}

/// One declared data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Logical name; also the schema name inside the database
    pub name: String,

    /// Plugin identity backing the connection
    pub plugin: String,

    /// Plugin-specific settings
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,

    /// Child connections, for aggregators
    #[serde(default)]
    pub connections: Vec<String>,

    #[serde(default)]
    pub limiters: Vec<RateLimiterSpec>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            config: empty_object(),
            connections: Vec::new(),
            limiters: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connections = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_aggregator(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Whether the schema-relevant payload differs. Rate limiters apply to the
    /// plugin at runtime and do not require the schema to be re-imported.
    pub fn payload_differs(&self, other: &ConnectionConfig) -> bool {
        self.config != other.config || self.connections != other.connections
    }

    /// Checks that `name` can be used as a schema name.
    pub fn validate_name(name: &str) -> Result<()> {
        let invalid = |reason: &str| {
            Err(ConduitError::invalid_input("connection name")
                .with_reason(format!("'{name}' {reason}")))
        };
        let mut chars = name.chars();
        match chars.next() {
            None => return invalid("is empty"),
            Some(c) if !(c.is_ascii_lowercase() || c == '_') => {
                return invalid("must start with a lowercase letter or underscore")
            }
            Some(_) => {}
        }
        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return invalid("may contain only lowercase letters, digits and underscores");
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return invalid("is longer than 63 characters");
        }
        Ok(())
    }
}

/// A snapshot of declared connections keyed by unique name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ConnectionSet(BTreeMap<String, ConnectionConfig>);

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set, rejecting duplicate or invalid names.
    pub fn from_configs(configs: impl IntoIterator<Item = ConnectionConfig>) -> Result<Self> {
        let mut set = Self::new();
        for config in configs {
            ConnectionConfig::validate_name(&config.name)?;
            if set.0.contains_key(&config.name) {
                return Err(ConduitError::invalid_input("connection name")
                    .with_reason(format!("'{}' is declared more than once", config.name)));
            }
            set.0.insert(config.name.clone(), config);
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionConfig> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Inserts or replaces a connection.
    pub fn insert(&mut self, config: ConnectionConfig) {
        self.0.insert(config.name.clone(), config);
    }

    pub fn remove(&mut self, name: &str) -> Option<ConnectionConfig> {
        self.0.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionConfig> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ConnectionSet::from_configs(vec![
            ConnectionConfig::new("aws", "aws"),
            ConnectionConfig::new("aws", "gcp"),
        ]);
        assert!(matches!(result, Err(ConduitError::InvalidInput { .. })));
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "Prod", "1abc", "with-dash", "a".repeat(64).as_str()] {
            assert!(
                ConnectionConfig::validate_name(name).is_err(),
                "{name} should be invalid"
            );
        }
        assert!(ConnectionConfig::validate_name("_aws_prod_01").is_ok());
    }

    #[test]
    fn test_limiters_do_not_change_payload() {
        let base = ConnectionConfig::new("aws", "aws").with_config(json!({"regions": ["us-east-1"]}));
        let mut limited = base.clone();
        limited.limiters.push(RateLimiterSpec {
            name: "slow".to_string(),
            fill_rate: Some(5.0),
            bucket_size: Some(10),
            max_concurrency: None,
            scope: vec!["region".to_string()],
        });
        assert!(!base.payload_differs(&limited));

        let moved = base.clone().with_config(json!({"regions": ["eu-west-1"]}));
        assert!(base.payload_differs(&moved));

        let aggregated = base.clone().with_children(["a", "b"]);
        assert!(base.payload_differs(&aggregated));
        assert!(aggregated.is_aggregator());
    }

    #[test]
    fn test_set_serializes_as_map() {
        let set = ConnectionSet::from_configs(vec![ConnectionConfig::new("aws", "aws")])
            .expect("valid set");
        let value = serde_json::to_value(&set).expect("serialize");
        assert_eq!(value["aws"]["plugin"], "aws");
        let back: ConnectionSet = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, set);
    }
}
