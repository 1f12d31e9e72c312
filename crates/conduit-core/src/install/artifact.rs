//! Where engine and extension binaries come from.
//!
//! Downloading release images is handled elsewhere; the installer only sees
//! the [`ArtifactSource`] contract. [`LocalDirectorySource`] serves unpacked
//! bundles from a directory, which keeps installs offline and testable.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::constants::{ENGINE_VERSION, FDW_VERSION};
use crate::error::{ConduitError, FsResultExt, Result};

/// The two installable artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Engine binaries
    Engine,
    /// Foreign-data extension
    Extension,
}

impl ArtifactKind {
    /// Name recorded in the versions file.
    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Engine => "embedded_db",
            ArtifactKind::Extension => "fdw_extension",
        }
    }

    fn directory(self) -> &'static str {
        match self {
            ArtifactKind::Engine => "engine",
            ArtifactKind::Extension => "extension",
        }
    }

    fn default_version(self) -> &'static str {
        match self {
            ArtifactKind::Engine => ENGINE_VERSION,
            ArtifactKind::Extension => FDW_VERSION,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An artifact resolved for the current release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub kind: ArtifactKind,
    pub version: String,
    /// Content digest compared against the installed record
    pub image_digest: String,
    /// Human-readable origin, recorded as `installed_from`
    pub source: String,
    pub location: PathBuf,
}

/// Resolves and unpacks release artifacts.
pub trait ArtifactSource: Send + Sync {
    /// The artifact of `kind` for the current release.
    fn resolve(&self, kind: ArtifactKind) -> Result<ResolvedArtifact>;

    /// Unpacks `artifact` into `dest`, merging with existing content.
    /// Returns the directory the files landed in.
    fn install(&self, artifact: &ResolvedArtifact, dest: &Path) -> Result<PathBuf>;
}

/// Bundles laid out as `<root>/engine/` and `<root>/extension/`, each with
/// an optional `VERSION` file.
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactSource for LocalDirectorySource {
    fn resolve(&self, kind: ArtifactKind) -> Result<ResolvedArtifact> {
        let location = self.root.join(kind.directory());
        if !location.is_dir() {
            return Err(ConduitError::Artifact {
                message: format!("no {kind} bundle at {}", location.display()),
            });
        }
        let version = match std::fs::read_to_string(location.join("VERSION")) {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => kind.default_version().to_string(),
        };
        Ok(ResolvedArtifact {
            kind,
            version,
            image_digest: digest_tree(&location)?,
            source: format!("local:{}", location.display()),
            location,
        })
    }

    fn install(&self, artifact: &ResolvedArtifact, dest: &Path) -> Result<PathBuf> {
        copy_tree(&artifact.location, dest)?;
        Ok(dest.to_path_buf())
    }
}

/// `sha256:<hex>` over every file's relative path and contents, in a stable
/// order.
pub fn digest_tree(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ConduitError::Artifact {
            message: format!("failed to read {}: {e}", root.display()),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        let mut file = File::open(entry.path()).fs_context(entry.path())?;
        io::copy(&mut file, &mut hasher).fs_context(entry.path())?;
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// `sha256:<hex>` of one file.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path).fs_context(path)?;
    io::copy(&mut file, &mut hasher).fs_context(path)?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| ConduitError::Artifact {
            message: format!("failed to read {}: {e}", from.display()),
        })?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        if relative == Path::new("VERSION") {
            continue;
        }
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).fs_context(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).fs_context(parent)?;
            }
            // Copies permission bits too, so binaries stay executable.
            std::fs::copy(entry.path(), &target).fs_context(&target)?;
        }
    }
    Ok(())
}
