use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use conduit_core::install::artifact::digest_tree;
use conduit_core::install::{DatabaseVersionFile, VersionFile};
use conduit_core::service::{
    ProcessFinder, ProcessHandle, ShutdownSequence, ShutdownStep, StopSignal,
};
use conduit_core::{InstallLayout, Orchestrator, OrchestratorBuilder};
use tempfile::TempDir;

pub const VERSION: &str = "14.2.0";

/// A process table with nothing from this application in it.
pub struct EmptyProcessTable;

impl ProcessFinder for EmptyProcessTable {
    fn find_engine_instances(&self) -> Vec<Arc<dyn ProcessHandle>> {
        Vec::new()
    }

    fn find_plugin_managers(&self) -> Vec<Arc<dyn ProcessHandle>> {
        Vec::new()
    }

    fn process(&self, _pid: u32) -> Option<Arc<dyn ProcessHandle>> {
        None
    }
}

/// An engine process that ignores every signal.
pub struct StubbornEngine(pub u32);

impl ProcessHandle for StubbornEngine {
    fn pid(&self) -> u32 {
        self.0
    }

    fn signal(&self, _signal: StopSignal) -> bool {
        true
    }

    fn is_alive(&self) -> bool {
        true
    }
}

/// A process table holding one engine nobody recorded.
pub struct OrphanedEngineTable;

impl ProcessFinder for OrphanedEngineTable {
    fn find_engine_instances(&self) -> Vec<Arc<dyn ProcessHandle>> {
        vec![Arc::new(StubbornEngine(4242))]
    }

    fn find_plugin_managers(&self) -> Vec<Arc<dyn ProcessHandle>> {
        Vec::new()
    }

    fn process(&self, pid: u32) -> Option<Arc<dyn ProcessHandle>> {
        (pid == 4242).then(|| Arc::new(StubbornEngine(pid)) as Arc<dyn ProcessHandle>)
    }
}

/// Escalation short enough for tests.
pub fn quick_shutdown() -> ShutdownSequence {
    ShutdownSequence::new(
        vec![
            ShutdownStep::new(StopSignal::Smart, Duration::from_millis(20)),
            ShutdownStep::new(StopSignal::Immediate, Duration::from_millis(20)),
        ],
        Duration::from_millis(5),
    )
}

/// Writes engine and extension bundles under `<root>/artifacts`.
pub fn write_bundles(root: &Path, engine: &str, extension: &str) {
    let engine_bin = root.join("artifacts/engine/bin");
    std::fs::create_dir_all(&engine_bin).expect("Failed to create engine bundle");
    std::fs::write(engine_bin.join("postgres"), engine).expect("Failed to write engine");
    std::fs::write(root.join("artifacts/engine/VERSION"), VERSION).expect("Failed to write VERSION");

    let extension_lib = root.join("artifacts/extension/lib");
    std::fs::create_dir_all(&extension_lib).expect("Failed to create extension bundle");
    std::fs::write(extension_lib.join("conduit_postgres_fdw.so"), extension)
        .expect("Failed to write extension");
}

/// Copies the engine binary and a data directory into the install, without
/// recording anything, as an interrupted install leaves them.
pub fn lay_out_engine(root: &Path) -> InstallLayout {
    let layout = InstallLayout::new(root.join("install"));
    layout.ensure_dirs().expect("Failed to create layout");
    let engine_bin = layout.bin_dir(VERSION);
    std::fs::create_dir_all(&engine_bin).expect("Failed to create bin dir");
    std::fs::copy(
        root.join("artifacts/engine/bin/postgres"),
        layout.engine_binary(VERSION),
    )
    .expect("Failed to copy engine");
    let data_dir = layout.data_dir(VERSION);
    std::fs::create_dir_all(&data_dir).expect("Failed to create data dir");
    std::fs::write(data_dir.join("PG_VERSION"), "14\n").expect("Failed to write PG_VERSION");
    layout
}

/// Lays out an install as if the current bundles had been installed and
/// initialized.
pub fn preinstall(root: &Path) {
    let layout = lay_out_engine(root);
    let versions = DatabaseVersionFile {
        embedded_db: VersionFile {
            name: "embedded_db".to_string(),
            version: VERSION.to_string(),
            image_digest: digest_tree(&root.join("artifacts/engine")).expect("digest"),
            ..VersionFile::default()
        },
        fdw_extension: VersionFile {
            name: "fdw_extension".to_string(),
            version: "1.9.0".to_string(),
            image_digest: digest_tree(&root.join("artifacts/extension")).expect("digest"),
            ..VersionFile::default()
        },
        ..DatabaseVersionFile::default()
    };
    versions
        .save(&layout.versions_file())
        .expect("Failed to write versions file");
}

/// Orchestrator over `<root>/install` with bundles from `<root>/artifacts`.
pub async fn create_test_orchestrator(root: &TempDir) -> Orchestrator {
    OrchestratorBuilder::new()
        .with_install_dir(Some(root.path().join("install")))
        .with_artifact_dir(Some(root.path().join("artifacts")))
        .with_process_finder(Arc::new(EmptyProcessTable))
        .build()
        .await
        .expect("Failed to create orchestrator")
}
