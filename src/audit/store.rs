//! Persistence adapters for the audit trail.
//!
//! # Design Decisions
//! - Stores receive the full entry list on every save; the trail stays the
//!   source of truth and a store is only a mirror
//! - `JsonFileStore` writes to a sibling temp file and renames, so a crash
//!   mid-write never leaves a truncated log behind

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::audit::trail::AuditEntry;
use crate::error::{CoreError, CoreResult};

/// Optional durable mirror of the audit log.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Replace the stored log with `entries`.
    async fn save(&self, entries: &[AuditEntry]) -> CoreResult<()>;
    /// Stored entries, or `None` if nothing was ever saved.
    async fn load(&self) -> CoreResult<Option<Vec<AuditEntry>>>;
    async fn clear(&self) -> CoreResult<()>;
}

/// Audit log kept as a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn save(&self, entries: &[AuditEntry]) -> CoreResult<()> {
        let body = serde_json::to_vec_pretty(entries)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::transient("create audit directory", e))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| CoreError::transient("write audit log", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CoreError::transient("rename audit log", e))?;
        Ok(())
    }

    async fn load(&self) -> CoreResult<Option<Vec<AuditEntry>>> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoreError::transient("read audit log", e)),
        };
        let entries = serde_json::from_slice(&body).map_err(|e| CoreError::Parse {
            origin: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(entries))
    }

    async fn clear(&self) -> CoreResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::transient("clear audit log", e)),
        }
    }
}

/// In-memory store, handy as an archive target and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Option<Vec<AuditEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn save(&self, entries: &[AuditEntry]) -> CoreResult<()> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = Some(entries.to_vec());
        Ok(())
    }

    async fn load(&self) -> CoreResult<Option<Vec<AuditEntry>>> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn clear(&self) -> CoreResult<()> {
        *self.entries.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::trail::{AuditAction, AuditEntry, LogOptions};
    use serde_json::json;

    fn entry() -> AuditEntry {
        AuditEntry::new(
            AuditAction::Update,
            json!({"a": 1}),
            json!({"a": 2}),
            LogOptions::default(),
            "session-1",
        )
    }

    #[tokio::test]
    async fn test_json_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("audit.json"));

        assert!(store.load().await.unwrap().is_none());
        let saved = vec![entry(), entry()];
        store.save(&saved).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, saved[0].id);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&[entry()]).await.unwrap();
        assert_eq!(store.len(), 1);
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
