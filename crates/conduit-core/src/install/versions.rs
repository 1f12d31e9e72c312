//! Installed version records.

use std::path::Path;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::artifact::ResolvedArtifact;
use crate::error::{ConduitError, Result};
use crate::service::running_info::write_private_file;

/// Current layout version of `versions.json`.
pub const VERSIONS_STRUCT_VERSION: u32 = 20240612;

/// What is installed for one artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VersionFile {
    pub name: String,
    pub version: String,
    /// Digest of the artifact the install came from; drives staleness
    pub image_digest: String,
    pub binary_digest: String,
    pub binary_architecture: String,
    pub installed_from: String,
    pub last_checked_date: Option<Timestamp>,
    pub install_date: Option<Timestamp>,
}

impl VersionFile {
    /// Record for a just-installed `artifact`.
    pub fn installed(artifact: &ResolvedArtifact, binary_digest: String) -> Self {
        let now = Timestamp::now();
        Self {
            name: artifact.kind.name().to_string(),
            version: artifact.version.clone(),
            image_digest: artifact.image_digest.clone(),
            binary_digest,
            binary_architecture: std::env::consts::ARCH.to_string(),
            installed_from: artifact.source.clone(),
            last_checked_date: Some(now),
            install_date: Some(now),
        }
    }

    pub fn is_installed(&self) -> bool {
        !self.image_digest.is_empty()
    }
}

/// Contents of `internal/versions.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseVersionFile {
    #[serde(default)]
    pub struct_version: u32,
    #[serde(default)]
    pub embedded_db: VersionFile,
    #[serde(default)]
    pub fdw_extension: VersionFile,
}

impl DatabaseVersionFile {
    /// Reads the file, or an empty record when nothing was installed yet.
    /// Older layouts are rewritten at the current struct version.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConduitError::file_system(path, e)),
        };
        let mut versions: Self = serde_json::from_str(&contents)?;
        if versions.struct_version < VERSIONS_STRUCT_VERSION {
            versions.struct_version = VERSIONS_STRUCT_VERSION;
            versions.save(path)?;
        }
        Ok(versions)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut record = self.clone();
        record.struct_version = VERSIONS_STRUCT_VERSION;
        write_private_file(path, &serde_json::to_vec_pretty(&record)?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;
    use crate::install::artifact::ArtifactKind;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().expect("tempdir");
        let versions = DatabaseVersionFile::load(&dir.path().join("versions.json")).expect("load");
        assert!(!versions.embedded_db.is_installed());
        assert!(!versions.fdw_extension.is_installed());
    }

    #[test]
    fn test_save_and_load_keeps_digests() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("versions.json");
        let artifact = ResolvedArtifact {
            kind: ArtifactKind::Engine,
            version: "14.2.0".to_string(),
            image_digest: "sha256:abc".to_string(),
            source: "local:/artifacts/engine".to_string(),
            location: PathBuf::from("/artifacts/engine"),
        };
        let versions = DatabaseVersionFile {
            embedded_db: VersionFile::installed(&artifact, "sha256:bin".to_string()),
            ..DatabaseVersionFile::default()
        };
        versions.save(&path).expect("save");

        let loaded = DatabaseVersionFile::load(&path).expect("load");
        assert_eq!(loaded.struct_version, VERSIONS_STRUCT_VERSION);
        assert_eq!(loaded.embedded_db.image_digest, "sha256:abc");
        assert_eq!(loaded.embedded_db.name, "embedded_db");
        assert!(loaded.embedded_db.install_date.is_some());
    }

    #[test]
    fn test_old_layout_is_upgraded() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("versions.json");
        std::fs::write(
            &path,
            r#"{"embedded_db": {"name": "embedded_db", "version": "14.2.0", "image_digest": "sha256:x"}}"#,
        )
        .expect("write");
        let loaded = DatabaseVersionFile::load(&path).expect("load");
        assert_eq!(loaded.embedded_db.version, "14.2.0");
        assert_eq!(loaded.struct_version, VERSIONS_STRUCT_VERSION);
    }
}
