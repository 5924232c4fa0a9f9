//! Audit trail capacity, archiving and persistence failures.

use std::sync::Arc;

use serde_json::json;

use live_config::audit::{
    AuditAction, AuditFilter, AuditTrail, ExportFormat, JsonFileStore, LogOptions, MemoryStore, PersistentStore,
};
use live_config::settings::AuditSettings;

mod common;

fn settings(max_entries: usize) -> AuditSettings {
    AuditSettings {
        max_entries,
        archive: true,
        ..AuditSettings::default()
    }
}

async fn log_updates(trail: &AuditTrail, count: usize) {
    for i in 0..count {
        trail
            .log_change(
                AuditAction::Update,
                &json!({"n": i}),
                &json!({"n": i + 1}),
                LogOptions::default(),
            )
            .await;
    }
}

#[tokio::test]
async fn test_capacity_overflow_is_archived() {
    let archive = Arc::new(MemoryStore::new());
    let trail = AuditTrail::new(&settings(3)).with_archive(archive.clone());

    log_updates(&trail, 5).await;

    assert_eq!(trail.len(), 3);
    assert_eq!(archive.len(), 2);
    let newest = trail.query_audit_log(&AuditFilter::default());
    assert_eq!(newest[0].new_value, json!({"n": 5}));
    assert_eq!(newest[2].new_value, json!({"n": 3}));

    let archived = archive.load().await.unwrap().unwrap();
    assert_eq!(archived[0].new_value, json!({"n": 1}));
}

#[tokio::test]
async fn test_store_failures_do_not_block_logging() {
    let trail = AuditTrail::new(&settings(100)).with_store(Arc::new(common::FailingStore));

    assert_eq!(trail.load_from_store().await, 0);
    log_updates(&trail, 2).await;

    assert_eq!(trail.len(), 2);
    assert_eq!(trail.get_audit_statistics().total_entries, 2);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("log.json");

    let first = AuditTrail::new(&settings(100)).with_store(Arc::new(JsonFileStore::new(&path)));
    log_updates(&first, 3).await;
    let id = first.query_audit_log(&AuditFilter::default())[0].id.clone();

    let second = AuditTrail::new(&settings(100)).with_store(Arc::new(JsonFileStore::new(&path)));
    assert_eq!(second.load_from_store().await, 3);
    assert!(second.get_audit_entry(&id).is_some());

    let csv = second
        .export_audit_log(ExportFormat::Csv, &AuditFilter::default())
        .unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "id,timestamp,action,path,user,source,reason,session,changes"
    );
    assert_eq!(lines.count(), 3);
}
