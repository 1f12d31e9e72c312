//! Installed plugin manifests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION};
use crate::error::{ConduitError, Result};

/// Descriptions for one table a plugin exposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableManifest {
    #[serde(default)]
    pub description: Option<String>,
    /// Column name to description
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

/// What a plugin declares about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub protocol_version: u32,
    #[serde(default)]
    pub tables: BTreeMap<String, TableManifest>,
}

impl PluginManifest {
    /// Whether this release can import schemas served by the plugin.
    pub fn check_compatibility(&self) -> std::result::Result<(), String> {
        if (MIN_PROTOCOL_VERSION..=MAX_PROTOCOL_VERSION).contains(&self.protocol_version) {
            Ok(())
        } else {
            Err(format!(
                "plugin '{}' uses protocol version {}, supported versions are {}..={}",
                self.name, self.protocol_version, MIN_PROTOCOL_VERSION, MAX_PROTOCOL_VERSION
            ))
        }
    }
}

/// Lookup of installed plugins.
pub trait PluginCatalog: Send + Sync {
    /// Manifest of `plugin`, or `None` when it is not installed.
    fn manifest(&self, plugin: &str) -> Result<Option<PluginManifest>>;
}

/// Plugins installed as `<dir>/<plugin>/manifest.json`, with characters
/// that are not allowed in directory names replaced by `_`.
#[derive(Debug, Clone)]
pub struct DirectoryPluginCatalog {
    dir: PathBuf,
}

impl DirectoryPluginCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn manifest_path(&self, plugin: &str) -> PathBuf {
        self.dir.join(sanitize_plugin_name(plugin)).join("manifest.json")
    }
}

/// `hub.example.com/org/aws@latest` becomes `hub.example.com_org_aws_latest`.
pub fn sanitize_plugin_name(plugin: &str) -> String {
    plugin
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '@' => '_',
            other => other,
        })
        .collect()
}

impl PluginCatalog for DirectoryPluginCatalog {
    fn manifest(&self, plugin: &str) -> Result<Option<PluginManifest>> {
        let path = self.manifest_path(plugin);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConduitError::file_system(&path, e)),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }
}
