mod common;

use std::sync::Arc;

use common::{
    create_test_orchestrator, lay_out_engine, preinstall, quick_shutdown, write_bundles,
    OrphanedEngineTable, VERSION,
};
use conduit_core::install::DatabaseVersionFile;
use conduit_core::{ErrorCategory, InstallAction, OrchestratorBuilder, StopStatus};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_current_install_is_left_alone() {
    let root = TempDir::new().expect("Failed to create temp dir");
    write_bundles(root.path(), "engine-v1", "fdw-v1");
    preinstall(root.path());
    let orchestrator = create_test_orchestrator(&root).await;

    let outcome = orchestrator
        .install(&CancellationToken::new())
        .await
        .expect("Install check failed");
    assert_eq!(outcome.engine, InstallAction::AlreadyCurrent);
    assert_eq!(outcome.extension, InstallAction::AlreadyCurrent);
    assert!(!outcome.changed());
}

#[tokio::test]
async fn test_stale_extension_is_reinstalled_alone() {
    let root = TempDir::new().expect("Failed to create temp dir");
    write_bundles(root.path(), "engine-v1", "fdw-v1");
    preinstall(root.path());
    write_bundles(root.path(), "engine-v1", "fdw-v2");
    let orchestrator = create_test_orchestrator(&root).await;
    let layout = orchestrator.layout().clone();
    let before = DatabaseVersionFile::load(&layout.versions_file()).expect("versions");

    let outcome = orchestrator
        .install(&CancellationToken::new())
        .await
        .expect("Extension install failed");
    assert_eq!(outcome.engine, InstallAction::AlreadyCurrent);
    assert_eq!(outcome.extension, InstallAction::Upgraded);

    let installed = layout.engine_dir(VERSION).join("lib/conduit_postgres_fdw.so");
    assert_eq!(std::fs::read_to_string(installed).expect("extension"), "fdw-v2");

    let after = DatabaseVersionFile::load(&layout.versions_file()).expect("versions");
    assert_eq!(after.embedded_db, before.embedded_db);
    assert_ne!(after.fdw_extension.image_digest, before.fdw_extension.image_digest);
    assert!(after.fdw_extension.install_date.is_some());

    // A second check finds everything current.
    let again = orchestrator
        .install(&CancellationToken::new())
        .await
        .expect("Install check failed");
    assert!(!again.changed());
}

#[tokio::test]
async fn test_rebuilt_engine_replaces_binaries_in_place() {
    let root = TempDir::new().expect("Failed to create temp dir");
    write_bundles(root.path(), "engine-v1", "fdw-v1");
    preinstall(root.path());
    write_bundles(root.path(), "engine-v1-rebuilt", "fdw-v1");
    let orchestrator = create_test_orchestrator(&root).await;
    let layout = orchestrator.layout().clone();

    let outcome = orchestrator
        .install(&CancellationToken::new())
        .await
        .expect("Binary replacement failed");
    assert_eq!(outcome.engine, InstallAction::Upgraded);
    assert_eq!(
        std::fs::read_to_string(layout.engine_binary(VERSION)).expect("engine"),
        "engine-v1-rebuilt"
    );
    // Data directory untouched.
    assert!(layout.data_dir(VERSION).join("PG_VERSION").exists());
}

#[tokio::test]
async fn test_missing_bundles_fail_as_install_error() {
    let root = TempDir::new().expect("Failed to create temp dir");
    let orchestrator = create_test_orchestrator(&root).await;

    let err = orchestrator
        .refresh_connections(&[], &CancellationToken::new())
        .await
        .expect_err("Refresh without an install should fail");
    assert_eq!(err.category(), ErrorCategory::Install);
    assert!(err.to_string().contains("resolve artifacts"));
}

#[tokio::test]
async fn test_status_and_stop_when_nothing_runs() {
    let root = TempDir::new().expect("Failed to create temp dir");
    let orchestrator = create_test_orchestrator(&root).await;

    let status = orchestrator.status().await.expect("Status failed");
    assert!(status.running.is_none());
    assert!(status.connections.is_none());
    assert!(!status.versions.embedded_db.is_installed());

    let stopped = orchestrator
        .stop_service(false, &CancellationToken::new())
        .await
        .expect("Stop failed");
    assert_eq!(stopped, StopStatus::NotRunning);

    let forced = orchestrator
        .stop_service(true, &CancellationToken::new())
        .await
        .expect("Force stop failed");
    assert_eq!(forced, StopStatus::NotRunning);
}

#[tokio::test]
async fn test_stale_running_record_is_purged() {
    let root = TempDir::new().expect("Failed to create temp dir");
    let orchestrator = create_test_orchestrator(&root).await;
    let record = orchestrator.layout().running_info_file();
    std::fs::write(
        &record,
        r#"{"pid": 999999, "port": 9193, "password": "abcd-efgh-ijkl"}"#,
    )
    .expect("Failed to write record");

    let status = orchestrator.status().await.expect("Status failed");
    assert!(status.running.is_none());
    assert!(!record.exists());
}

#[tokio::test]
async fn test_interrupted_install_is_redone() {
    let root = TempDir::new().expect("Failed to create temp dir");
    write_bundles(root.path(), "engine-v1", "fdw-v1");
    let layout = lay_out_engine(root.path());
    assert!(!layout.versions_file().exists());
    let orchestrator = create_test_orchestrator(&root).await;

    // The bundle ships no initdb, so redoing the install stops at
    // initialization instead of taking the binaries-only path.
    let err = orchestrator
        .install(&CancellationToken::new())
        .await
        .expect_err("Unrecorded install should be redone and fail at initdb");
    assert_eq!(err.category(), ErrorCategory::Install);
    assert!(err.to_string().contains("initialize data directory"), "{err}");

    assert!(!layout.data_dir(VERSION).join("PG_VERSION").exists());
    let versions = DatabaseVersionFile::load(&layout.versions_file()).expect("versions");
    assert!(!versions.embedded_db.is_installed());
}

#[tokio::test]
async fn test_unstoppable_engine_fails_install_as_install_error() {
    let root = TempDir::new().expect("Failed to create temp dir");
    write_bundles(root.path(), "engine-v1", "fdw-v1");
    let orchestrator = OrchestratorBuilder::new()
        .with_install_dir(Some(root.path().join("install")))
        .with_artifact_dir(Some(root.path().join("artifacts")))
        .with_process_finder(Arc::new(OrphanedEngineTable))
        .with_shutdown(quick_shutdown())
        .build()
        .await
        .expect("Failed to create orchestrator");

    let err = orchestrator
        .install(&CancellationToken::new())
        .await
        .expect_err("Install should not proceed past a live engine");
    assert_eq!(err.category(), ErrorCategory::Install);
    assert!(err.to_string().contains("stop running database"), "{err}");
}
