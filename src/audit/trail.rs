//! Append-only audit trail of configuration changes.
//!
//! # Responsibilities
//! - Record every change with its structural diff and actor
//! - Answer filtered queries and export them as JSON or CSV
//! - Enforce age and count retention, archiving first when configured
//! - Mirror the log into an optional persistent store
//!
//! # Design Decisions
//! - Entries are `Arc`-shared and never mutated once appended
//! - The entry list sits behind a `std::sync::Mutex` that is never held
//!   across an await; persistence runs on a copy after the lock is released
//! - Store failures are logged and swallowed; memory stays authoritative

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::diff::{diff, generate_diff_summary, DiffEntry};
use crate::audit::store::PersistentStore;
use crate::error::CoreResult;
use crate::observability::metrics;
use crate::runtime::manager::{
    ConfigChangeEvent, ConfigWatcher, WatcherError, IMPORT_SOURCE, ROLLBACK_SOURCE,
};
use crate::settings::AuditSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Rollback,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Rollback => "rollback",
            AuditAction::Delete => "delete",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "rollback" => Ok(AuditAction::Rollback),
            "delete" => Ok(AuditAction::Delete),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// Who made a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditUser {
    pub id: String,
    pub name: String,
    pub role: String,
}

impl Default for AuditUser {
    fn default() -> Self {
        Self {
            id: "system".to_string(),
            name: "System".to_string(),
            role: "system".to_string(),
        }
    }
}

/// Immutable record of one configuration change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub old_value: Value,
    pub new_value: Value,
    pub diff: Vec<DiffEntry>,
    pub user: AuditUser,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub session_id: String,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        old_value: Value,
        new_value: Value,
        options: LogOptions,
        default_session: &str,
    ) -> Self {
        let diff = diff(&old_value, &new_value);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            path: options.path,
            old_value,
            new_value,
            diff,
            user: options.user.unwrap_or_default(),
            source: options.source,
            reason: options.reason,
            session_id: options
                .session_id
                .unwrap_or_else(|| default_session.to_string()),
        }
    }

    /// One-line description of the diff.
    pub fn summary(&self) -> String {
        generate_diff_summary(&self.diff)
    }

    fn touches(&self, prefix: &str) -> bool {
        let matches = |path: &str| {
            path == prefix
                || (path.starts_with(prefix) && path[prefix.len()..].starts_with('.'))
        };
        self.path.as_deref().is_some_and(matches) || self.diff.iter().any(|d| matches(&d.path))
    }
}

/// Context attached to a logged change.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub path: Option<String>,
    pub user: Option<AuditUser>,
    pub source: String,
    pub reason: Option<String>,
    pub session_id: Option<String>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            path: None,
            user: None,
            source: "api".to_string(),
            reason: None,
            session_id: None,
        }
    }
}

/// Query over the audit log. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub source: Option<String>,
    pub user_id: Option<String>,
    /// Matches entries whose path or any diff path is at or below this path.
    pub path: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.source.as_ref().map_or(true, |s| &entry.source == s)
            && self.user_id.as_ref().map_or(true, |u| &entry.user.id == u)
            && self.session_id.as_ref().map_or(true, |s| &entry.session_id == s)
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
            && self.path.as_deref().map_or(true, |p| entry.touches(p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub total_entries: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Outcome of [`AuditTrail::enforce_retention_policy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub expired: usize,
    pub trimmed: usize,
    pub archived: usize,
}

/// The audit log.
pub struct AuditTrail {
    entries: Mutex<Vec<Arc<AuditEntry>>>,
    max_entries: usize,
    max_age: Duration,
    archive_enabled: bool,
    session_id: String,
    store: Option<Arc<dyn PersistentStore>>,
    archive: Option<Arc<dyn PersistentStore>>,
}

impl AuditTrail {
    pub fn new(settings: &AuditSettings) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries: settings.max_entries.max(1),
            max_age: i64::try_from(settings.max_age_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            archive_enabled: settings.archive,
            session_id: uuid::Uuid::new_v4().to_string(),
            store: None,
            archive: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn PersistentStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Session id stamped on entries that do not carry their own.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Replace the in-memory log with the store's contents. Returns the count loaded.
    pub async fn load_from_store(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        match store.load().await {
            Ok(Some(loaded)) => {
                let count = loaded.len();
                *self.entries() = loaded.into_iter().map(Arc::new).collect();
                tracing::info!(entries = count, "Loaded audit log from store");
                count
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load audit log, starting empty");
                0
            }
        }
    }

    /// Append a change and return its id.
    pub async fn log_change(
        &self,
        action: AuditAction,
        old_value: &Value,
        new_value: &Value,
        options: LogOptions,
    ) -> String {
        let entry = AuditEntry::new(
            action,
            old_value.clone(),
            new_value.clone(),
            options,
            &self.session_id,
        );
        let id = entry.id.clone();
        tracing::debug!(
            audit_id = %id,
            action = action.as_str(),
            source = %entry.source,
            changes = %entry.summary(),
            "Audit entry recorded"
        );
        metrics::record_audit_entry(action.as_str());

        let over_capacity = {
            let mut entries = self.entries();
            entries.push(Arc::new(entry));
            entries.len() > self.max_entries
        };
        if over_capacity {
            self.enforce_retention_policy().await;
        } else {
            self.persist().await;
        }
        id
    }

    /// Matching entries, newest first.
    pub fn query_audit_log(&self, filter: &AuditFilter) -> Vec<Arc<AuditEntry>> {
        self.entries()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn get_audit_entry(&self, id: &str) -> Option<Arc<AuditEntry>> {
        self.entries().iter().find(|e| e.id == id).cloned()
    }

    /// Remove one entry by id.
    pub async fn delete_audit_entry(&self, id: &str) -> bool {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|e| e.id != id);
            entries.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    pub fn get_audit_statistics(&self) -> AuditStatistics {
        let entries = self.entries();
        let mut stats = AuditStatistics {
            total_entries: entries.len(),
            oldest: entries.first().map(|e| e.timestamp),
            newest: entries.last().map(|e| e.timestamp),
            ..AuditStatistics::default()
        };
        for entry in entries.iter() {
            *stats.by_action.entry(entry.action.as_str().to_string()).or_default() += 1;
            *stats.by_source.entry(entry.source.clone()).or_default() += 1;
            *stats.by_user.entry(entry.user.id.clone()).or_default() += 1;
        }
        stats
    }

    /// Render matching entries (oldest first) in the requested format.
    pub fn export_audit_log(&self, format: ExportFormat, filter: &AuditFilter) -> CoreResult<String> {
        let mut entries = self.query_audit_log(filter);
        entries.reverse();
        match format {
            ExportFormat::Json => {
                let plain: Vec<&AuditEntry> = entries.iter().map(AsRef::as_ref).collect();
                Ok(serde_json::to_string_pretty(&plain)?)
            }
            ExportFormat::Csv => {
                let mut out = String::from("id,timestamp,action,path,user,source,reason,session,changes\n");
                for e in &entries {
                    let row = [
                        e.id.clone(),
                        e.timestamp.to_rfc3339(),
                        e.action.as_str().to_string(),
                        e.path.clone().unwrap_or_default(),
                        e.user.id.clone(),
                        e.source.clone(),
                        e.reason.clone().unwrap_or_default(),
                        e.session_id.clone(),
                        e.summary(),
                    ];
                    let cells: Vec<String> = row.iter().map(|c| csv_cell(c)).collect();
                    out.push_str(&cells.join(","));
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }

    /// Drop entries older than the maximum age, then cap the log at the maximum count.
    pub async fn enforce_retention_policy(&self) -> RetentionReport {
        // An age limit reaching before the epoch expires nothing.
        let cutoff = Utc::now().checked_sub_signed(self.max_age);
        let (removed, report) = {
            let mut entries = self.entries();
            let (expired, mut kept): (Vec<_>, Vec<_>) =
                entries.drain(..).partition(|e| cutoff.is_some_and(|c| e.timestamp < c));
            let overflow = kept.len().saturating_sub(self.max_entries);
            let trimmed: Vec<_> = kept.drain(..overflow).collect();
            *entries = kept;

            let report = RetentionReport {
                expired: expired.len(),
                trimmed: trimmed.len(),
                archived: 0,
            };
            let mut removed = expired;
            removed.extend(trimmed);
            (removed, report)
        };

        if removed.is_empty() {
            return report;
        }
        let archived = self.archive_entries(&removed).await;
        self.persist().await;
        tracing::info!(
            expired = report.expired,
            trimmed = report.trimmed,
            archived,
            "Audit retention enforced"
        );
        RetentionReport { archived, ..report }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<Arc<AuditEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries().iter().map(|e| AuditEntry::clone(e)).collect()
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.snapshot()).await {
            tracing::warn!(error = %e, "Failed to persist audit log");
        }
    }

    async fn archive_entries(&self, removed: &[Arc<AuditEntry>]) -> usize {
        if !self.archive_enabled {
            return 0;
        }
        let Some(archive) = &self.archive else {
            return 0;
        };
        let mut archived = match archive.load().await {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read audit archive");
                return 0;
            }
        };
        archived.extend(removed.iter().map(|e| AuditEntry::clone(e)));
        match archive.save(&archived).await {
            Ok(()) => removed.len(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to archive audit entries");
                0
            }
        }
    }
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Watcher that records every committed change in an [`AuditTrail`].
pub struct AuditWatcher {
    trail: Arc<AuditTrail>,
}

impl AuditWatcher {
    pub fn new(trail: Arc<AuditTrail>) -> Self {
        Self { trail }
    }
}

fn is_empty_config(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl ConfigWatcher for AuditWatcher {
    async fn on_change(&self, event: &ConfigChangeEvent) -> Result<(), WatcherError> {
        let action = if event.source == ROLLBACK_SOURCE {
            AuditAction::Rollback
        } else if event.source != IMPORT_SOURCE && is_empty_config(&event.old_value) {
            AuditAction::Create
        } else if is_empty_config(&event.new_value) {
            AuditAction::Delete
        } else {
            AuditAction::Update
        };

        let user = event
            .metadata
            .get("user")
            .map(|u| serde_json::from_value::<AuditUser>(u.clone()))
            .transpose()?;
        let options = LogOptions {
            path: event.metadata.get("path").and_then(Value::as_str).map(str::to_string),
            user,
            source: event.source.clone(),
            reason: event.metadata.get("reason").and_then(Value::as_str).map(str::to_string),
            session_id: event
                .metadata
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        self.trail
            .log_change(action, &event.old_value, &event.new_value, options)
            .await;
        Ok(())
    }
}
