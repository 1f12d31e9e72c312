//! Builder for creating and configuring [`Orchestrator`] instances.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task;

use super::Orchestrator;
use crate::config::{ListenMode, ServiceConfig};
use crate::connections::{
    ConnectionConfigLoader, DirectoryPluginCatalog, PluginCatalog, TomlConnectionLoader,
};
use crate::constants::DEFAULT_START_TIMEOUT;
use crate::error::{ConduitError, Result};
use crate::install::{ArtifactSource, Installer, LocalDirectorySource};
use crate::service::{ProcessFinder, ServiceManager, ShutdownSequence};

/// Builder for [`Orchestrator`].
///
/// Unset values fall back to the environment (`CONDUIT_*`) and then to
/// defaults derived from the install directory. Collaborators default to the
/// shipped implementations: artifacts from a local directory, connections
/// from a TOML file, plugin manifests from the plugin directory and the OS
/// process table for discovery.
#[derive(Default)]
pub struct OrchestratorBuilder {
    install_dir: Option<PathBuf>,
    port: Option<u16>,
    listen: Option<ListenMode>,
    database_name: Option<String>,
    artifact_dir: Option<PathBuf>,
    plugin_dir: Option<PathBuf>,
    connection_config: Option<PathBuf>,
    page_size: Option<usize>,
    start_timeout: Option<Duration>,
    finder: Option<Arc<dyn ProcessFinder>>,
    source: Option<Arc<dyn ArtifactSource>>,
    loader: Option<Arc<dyn ConnectionConfigLoader>>,
    catalog: Option<Arc<dyn PluginCatalog>>,
    shutdown: Option<ShutdownSequence>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the install directory.
    ///
    /// If not specified, uses `CONDUIT_INSTALL_DIR`, then the XDG data
    /// directory: `$XDG_DATA_HOME/conduit` or `~/.local/share/conduit`.
    pub fn with_install_dir<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.install_dir = Some(path.as_ref().to_path_buf());
        }
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if port.is_some() {
            self.port = port;
        }
        self
    }

    pub fn with_listen(mut self, listen: Option<ListenMode>) -> Self {
        if listen.is_some() {
            self.listen = listen;
        }
        self
    }

    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Directory holding the unpacked `engine` and `extension` bundles.
    pub fn with_artifact_dir<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.artifact_dir = Some(path.as_ref().to_path_buf());
        }
        self
    }

    pub fn with_plugin_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_dir = Some(path.into());
        self
    }

    pub fn with_connection_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.connection_config = Some(path.into());
        self
    }

    /// Number of connection state rows written per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn with_process_finder(mut self, finder: Arc<dyn ProcessFinder>) -> Self {
        self.finder = Some(finder);
        self
    }

    pub fn with_artifact_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_connection_loader(mut self, loader: Arc<dyn ConnectionConfigLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_plugin_catalog(mut self, catalog: Arc<dyn PluginCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSequence) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Resolves the configuration without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidInput` for a malformed environment
    /// override and `ConduitError::XdgDirectory` when no install directory
    /// can be determined.
    pub fn resolve_config(&self) -> Result<ServiceConfig> {
        let install_dir = ServiceConfig::resolve_install_dir(self.install_dir.clone())?;
        let mut config = ServiceConfig::with_install_dir(install_dir).apply_env()?;

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(name) = &self.database_name {
            config.database_name = name.clone();
        }
        if let Some(dir) = &self.artifact_dir {
            config.artifact_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.plugin_dir {
            config.plugin_dir = dir.clone();
        }
        if let Some(path) = &self.connection_config {
            config.connection_config = path.clone();
        }
        if let Some(page_size) = self.page_size {
            if page_size == 0 {
                return Err(ConduitError::invalid_input("page_size")
                    .with_reason("must be at least 1"));
            }
            config.state_page_size = page_size;
        }
        Ok(config)
    }

    /// Builds the orchestrator, creating the install directory tree.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::FileSystem` if the install directory cannot be
    /// created, plus any error from [`OrchestratorBuilder::resolve_config`].
    pub async fn build(self) -> Result<Orchestrator> {
        let config = self.resolve_config()?;
        let layout = config.layout();

        let dirs = layout.clone();
        task::spawn_blocking(move || dirs.ensure_dirs())
            .await
            .map_err(ConduitError::join)??;

        let mut service = match self.finder {
            Some(finder) => ServiceManager::with_finder(layout.clone(), finder),
            None => ServiceManager::new(layout.clone()),
        };
        if let Some(shutdown) = self.shutdown {
            service = service.with_shutdown(shutdown);
        }
        let service = Arc::new(service);

        let source = self.source.unwrap_or_else(|| {
            let dir = config
                .artifact_dir
                .clone()
                .unwrap_or_else(|| layout.root().join("artifacts"));
            Arc::new(LocalDirectorySource::new(dir)) as Arc<dyn ArtifactSource>
        });
        let loader = self
            .loader
            .unwrap_or_else(|| {
                Arc::new(TomlConnectionLoader::new(&config.connection_config))
                    as Arc<dyn ConnectionConfigLoader>
            });
        let catalog = self
            .catalog
            .unwrap_or_else(|| {
                Arc::new(DirectoryPluginCatalog::new(&config.plugin_dir)) as Arc<dyn PluginCatalog>
            });

        let installer = Installer::new(
            layout,
            source,
            Arc::clone(&service),
            config.database_name.clone(),
        );

        Ok(Orchestrator {
            config,
            service,
            installer,
            loader,
            catalog,
            start_timeout: self.start_timeout.unwrap_or(DEFAULT_START_TIMEOUT),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_explicit_values_win() {
        let dir = TempDir::new().expect("tempdir");
        let config = OrchestratorBuilder::new()
            .with_install_dir(Some(dir.path()))
            .with_port(Some(9300))
            .with_listen(Some(ListenMode::Network))
            .with_page_size(7)
            .resolve_config()
            .expect("config");
        assert_eq!(config.install_dir, dir.path());
        assert_eq!(config.port, 9300);
        assert_eq!(config.listen, ListenMode::Network);
        assert_eq!(config.state_page_size, 7);
        assert_eq!(config.plugin_dir, dir.path().join("plugins"));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let result = OrchestratorBuilder::new()
            .with_install_dir(Some(dir.path()))
            .with_page_size(0)
            .resolve_config();
        assert!(matches!(result, Err(ConduitError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_build_creates_layout() {
        let dir = TempDir::new().expect("tempdir");
        let orchestrator = OrchestratorBuilder::new()
            .with_install_dir(Some(dir.path()))
            .build()
            .await
            .expect("build");
        assert!(orchestrator.layout().internal_dir().is_dir());
        assert!(orchestrator.layout().logs_dir().is_dir());
    }
}
