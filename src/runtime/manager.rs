//! Runtime configuration manager.
//!
//! # Responsibilities
//! - Own the live configuration value and the lock serializing its mutation
//! - Merge, validate and commit partial updates
//! - Record snapshots and roll back to them
//! - Fan change events out to registered watchers
//! - Export and import the whole manager state
//!
//! # Design Decisions
//! - Reads are lock-free (`ArcSwap`); writers funnel through `ConfigurationLock`
//! - Watchers run while the lock is held, so notifications for one update
//!   finish before the next queued update starts
//! - Watcher failures (errors or panics) are logged and collected, never
//!   propagated and never undo a commit
//! - Validation failures and unknown snapshots come back as `UpdateResult`
//!   data; only commit failures without rollback escape as errors

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::audit::diff::diff;
use crate::error::{CoreError, CoreResult};
use crate::observability::metrics;
use crate::runtime::lock::ConfigurationLock;
use crate::runtime::merge::{deep_merge, leaf_paths, path_to_update};
use crate::runtime::snapshot::{ConfigurationSnapshot, SnapshotRegistry};
use crate::runtime::validation::{ValidationResult, Validator};
use crate::settings::ManagerSettings;

/// Source tag used for snapshots and events created by the manager itself.
pub const SYSTEM_SOURCE: &str = "system";
/// Source tag for rollbacks.
pub const ROLLBACK_SOURCE: &str = "rollback";
/// Source tag for state imports.
pub const IMPORT_SOURCE: &str = "import";

/// Event delivered to watchers after a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    pub old_value: Value,
    pub new_value: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub metadata: Map<String, Value>,
}

/// Error type returned by watchers.
pub type WatcherError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of committed configuration changes.
#[async_trait]
pub trait ConfigWatcher: Send + Sync {
    async fn on_change(&self, event: &ConfigChangeEvent) -> Result<(), WatcherError>;
}

/// Adapter turning a closure into a [`ConfigWatcher`].
pub struct FnWatcher<F>(pub F);

impl<F> FnWatcher<F>
where
    F: Fn(&ConfigChangeEvent) -> Result<(), WatcherError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F> ConfigWatcher for FnWatcher<F>
where
    F: Fn(&ConfigChangeEvent) -> Result<(), WatcherError> + Send + Sync,
{
    async fn on_change(&self, event: &ConfigChangeEvent) -> Result<(), WatcherError> {
        (self.0)(event)
    }
}

/// Handle returned by [`RuntimeConfigurationManager::watch_configuration`].
pub type WatcherId = u64;

/// Per-update behaviour switches.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Run the validator on the merged candidate.
    pub validate: bool,
    /// Store a pre-update snapshot.
    pub create_snapshot: bool,
    /// Invoke watchers after the commit.
    pub notify_watchers: bool,
    /// Restore the snapshot taken by this update if the commit fails.
    pub rollback_on_failure: bool,
    /// Replace the whole value instead of deep-merging into it.
    pub replace: bool,
    /// Who or what requested the change (`api`, `hot-reload:<key>`, `sync:<peer>`).
    pub source: String,
    /// Free-form context copied into the change event.
    pub metadata: Map<String, Value>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            validate: true,
            create_snapshot: true,
            notify_watchers: true,
            rollback_on_failure: true,
            replace: false,
            source: "api".to_string(),
            metadata: Map::new(),
        }
    }
}

impl UpdateOptions {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }
}

/// Outcome of a mutating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub success: bool,
    pub affected_paths: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub snapshot_id: Option<String>,
    pub validation: Option<ValidationResult>,
    pub rollback_performed: bool,
    pub watcher_failures: Vec<String>,
    pub error: Option<String>,
}

impl UpdateResult {
    fn new(source: &str) -> Self {
        Self {
            success: false,
            affected_paths: Vec::new(),
            timestamp: Utc::now(),
            source: source.to_string(),
            snapshot_id: None,
            validation: None,
            rollback_performed: false,
            watcher_failures: Vec::new(),
            error: None,
        }
    }
}

/// Counters reported by [`RuntimeConfigurationManager::get_runtime_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatistics {
    pub total_updates: u64,
    pub failed_updates: u64,
    pub rollbacks: u64,
    pub snapshot_count: usize,
    pub watcher_count: usize,
    pub lock_held: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// Backup blob consumed wholesale by [`RuntimeConfigurationManager::import_state`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerState {
    pub config: Value,
    pub snapshots: Vec<ConfigurationSnapshot>,
    pub statistics: RuntimeStatistics,
}

/// Owner of the live configuration value.
pub struct RuntimeConfigurationManager {
    current: ArcSwap<Value>,
    lock: ConfigurationLock,
    snapshots: Mutex<SnapshotRegistry>,
    watchers: Mutex<BTreeMap<WatcherId, Arc<dyn ConfigWatcher>>>,
    next_watcher_id: AtomicU64,
    validator: Option<Arc<dyn Validator>>,
    max_config_bytes: usize,
    total_updates: AtomicU64,
    failed_updates: AtomicU64,
    rollbacks: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<ConfigChangeEvent>,
}

impl RuntimeConfigurationManager {
    /// Create a manager holding `initial`, recorded as the `initial` snapshot.
    pub fn new(initial: Value, settings: &ManagerSettings) -> Self {
        let mut registry = SnapshotRegistry::new(settings.max_snapshots);
        registry.insert(ConfigurationSnapshot::new(
            "initial",
            initial.clone(),
            SYSTEM_SOURCE,
            Map::new(),
        ));
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));

        Self {
            current: ArcSwap::from_pointee(initial),
            lock: ConfigurationLock::new(),
            snapshots: Mutex::new(registry),
            watchers: Mutex::new(BTreeMap::new()),
            next_watcher_id: AtomicU64::new(1),
            validator: None,
            max_config_bytes: settings.max_config_bytes,
            total_updates: AtomicU64::new(0),
            failed_updates: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            last_update: Mutex::new(None),
            events,
        }
    }

    /// Attach the validation gate.
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Lock-free copy of the committed configuration.
    pub fn get_current_configuration(&self) -> Value {
        self.current.load().as_ref().clone()
    }

    /// Shared pointer to the committed configuration, without copying.
    pub fn current(&self) -> Arc<Value> {
        self.current.load_full()
    }

    /// Run the validation gate on a candidate without committing anything.
    pub async fn validate_candidate(&self, candidate: &Value) -> ValidationResult {
        match &self.validator {
            Some(validator) => validator.validate(candidate).await,
            None => ValidationResult::valid(),
        }
    }

    /// Merge `partial` into the current value and commit it.
    pub async fn update_configuration(
        &self,
        partial: Value,
        options: UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        let _guard = self.lock.acquire().await;
        let mut result = UpdateResult::new(&options.source);

        let current = self.current.load_full();
        let merged = if options.replace {
            partial.clone()
        } else {
            deep_merge(&current, &partial)
        };
        result.affected_paths = if options.replace {
            diff(&current, &merged).into_iter().map(|d| d.path).collect()
        } else {
            leaf_paths(&partial)
        };

        // 1. Validate the merged candidate
        if options.validate {
            let validation = self.validate_candidate(&merged).await;
            let rejected = !validation.is_valid;
            if rejected {
                tracing::warn!(
                    source = %options.source,
                    errors = %validation.summary(),
                    "Configuration update rejected by validation"
                );
                self.failed_updates.fetch_add(1, Ordering::Relaxed);
                metrics::record_update("rejected");
                result.error = Some(CoreError::Validation(validation.summary()).to_string());
            }
            result.validation = Some(validation);
            if rejected {
                return Ok(result);
            }
        }

        // 2. Snapshot the pre-update state
        if options.create_snapshot {
            let mut metadata = options.metadata.clone();
            metadata.insert("kind".into(), Value::from("pre-update"));
            let id = self.record_snapshot(None, current.as_ref().clone(), &options.source, metadata);
            result.snapshot_id = Some(id);
        }

        // 3. Commit
        if let Err(err) = self.commit(merged.clone()) {
            self.failed_updates.fetch_add(1, Ordering::Relaxed);
            metrics::record_update("failed");
            if !options.rollback_on_failure {
                tracing::error!(source = %options.source, error = %err, "Configuration commit failed");
                return Err(err);
            }
            // Only the snapshot taken by this update is a valid restore point.
            if let Some(id) = result.snapshot_id.clone() {
                if let Some(event) = self.restore_update_snapshot(&id, &current, &options.source) {
                    result.watcher_failures = self.notify_watchers(&event).await;
                }
                result.rollback_performed = true;
            }
            tracing::error!(
                source = %options.source,
                error = %err,
                snapshot_id = ?result.snapshot_id,
                rollback = result.rollback_performed,
                "Configuration commit failed"
            );
            result.error = Some(err.to_string());
            return Ok(result);
        }

        self.total_updates.fetch_add(1, Ordering::Relaxed);
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.timestamp);
        metrics::record_update("committed");
        tracing::info!(
            source = %options.source,
            paths = result.affected_paths.len(),
            "Configuration updated"
        );

        // 4. Notify
        if options.notify_watchers {
            let event = ConfigChangeEvent {
                old_value: current.as_ref().clone(),
                new_value: merged,
                timestamp: result.timestamp,
                source: options.source.clone(),
                metadata: options.metadata,
            };
            result.watcher_failures = self.notify_watchers(&event).await;
        }

        result.success = true;
        Ok(result)
    }

    /// Set a single dotted path, e.g. `server.port`.
    pub async fn update_configuration_path(
        &self,
        path: &str,
        value: Value,
        options: UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        let partial = match path_to_update(path, value) {
            Ok(partial) => partial,
            Err(err) => {
                let mut result = UpdateResult::new(&options.source);
                result.error = Some(err.to_string());
                return Ok(result);
            }
        };
        self.update_configuration(partial, options).await
    }

    /// Record the current value as a snapshot and return its id.
    pub async fn create_snapshot(
        &self,
        id: Option<String>,
        source: &str,
        metadata: Map<String, Value>,
    ) -> String {
        let _guard = self.lock.acquire().await;
        let config = self.get_current_configuration();
        self.record_snapshot(id, config, source, metadata)
    }

    /// Replace the current value with a stored snapshot.
    pub async fn rollback_to_snapshot(&self, id: &str) -> UpdateResult {
        let _guard = self.lock.acquire().await;
        let mut result = UpdateResult::new(ROLLBACK_SOURCE);

        let snapshot = self.snapshots().get(id).cloned();
        let Some(snapshot) = snapshot else {
            tracing::warn!(snapshot_id = %id, "Rollback target not found");
            result.error = Some(CoreError::not_found("snapshot", id).to_string());
            return result;
        };

        let old = self.current.load_full();
        result.affected_paths = diff(&old, &snapshot.config).into_iter().map(|d| d.path).collect();
        self.current.store(Arc::new(snapshot.config.clone()));
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.timestamp);
        metrics::record_rollback();
        tracing::info!(snapshot_id = %id, paths = result.affected_paths.len(), "Rolled back configuration");

        let mut metadata = Map::new();
        metadata.insert("snapshotId".into(), Value::from(id));
        let event = ConfigChangeEvent {
            old_value: old.as_ref().clone(),
            new_value: snapshot.config,
            timestamp: result.timestamp,
            source: ROLLBACK_SOURCE.to_string(),
            metadata,
        };
        result.watcher_failures = self.notify_watchers(&event).await;
        result.snapshot_id = Some(id.to_string());
        result.success = true;
        result
    }

    pub fn list_snapshots(&self) -> Vec<ConfigurationSnapshot> {
        self.snapshots().list()
    }

    pub fn get_snapshot(&self, id: &str) -> Option<ConfigurationSnapshot> {
        self.snapshots().get(id).cloned()
    }

    pub async fn delete_snapshot(&self, id: &str) -> bool {
        let _guard = self.lock.acquire().await;
        let removed = self.snapshots().remove(id).is_some();
        metrics::record_snapshot_count(self.snapshots().len());
        removed
    }

    /// Register a watcher invoked after every commit.
    pub fn watch_configuration(&self, watcher: Arc<dyn ConfigWatcher>) -> WatcherId {
        let id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        self.watchers().insert(id, watcher);
        id
    }

    /// Remove a watcher. Returns false if the id was unknown.
    pub fn unwatch_configuration(&self, id: WatcherId) -> bool {
        self.watchers().remove(&id).is_some()
    }

    /// Channel-based alternative to watchers; lagging receivers drop old events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.events.subscribe()
    }

    pub fn get_runtime_statistics(&self) -> RuntimeStatistics {
        RuntimeStatistics {
            total_updates: self.total_updates.load(Ordering::Relaxed),
            failed_updates: self.failed_updates.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            snapshot_count: self.snapshots().len(),
            watcher_count: self.watchers().len(),
            lock_held: self.lock.is_locked(),
            last_update: *self.last_update.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Export config, snapshots and statistics as one blob.
    pub async fn export_state(&self) -> ManagerState {
        let _guard = self.lock.acquire().await;
        ManagerState {
            config: self.get_current_configuration(),
            snapshots: self.list_snapshots(),
            statistics: self.get_runtime_statistics(),
        }
    }

    /// Replace config, snapshots and counters from an exported blob.
    pub async fn import_state(&self, state: ManagerState) -> UpdateResult {
        let _guard = self.lock.acquire().await;
        let mut result = UpdateResult::new(IMPORT_SOURCE);

        let old = self.current.load_full();
        result.affected_paths = diff(&old, &state.config).into_iter().map(|d| d.path).collect();
        self.current.store(Arc::new(state.config.clone()));
        self.snapshots().replace_all(state.snapshots);
        self.total_updates.store(state.statistics.total_updates, Ordering::Relaxed);
        self.failed_updates.store(state.statistics.failed_updates, Ordering::Relaxed);
        self.rollbacks.store(state.statistics.rollbacks, Ordering::Relaxed);
        *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = state.statistics.last_update;
        metrics::record_snapshot_count(self.snapshots().len());
        tracing::info!(paths = result.affected_paths.len(), "Imported manager state");

        let event = ConfigChangeEvent {
            old_value: old.as_ref().clone(),
            new_value: state.config,
            timestamp: result.timestamp,
            source: IMPORT_SOURCE.to_string(),
            metadata: Map::new(),
        };
        result.watcher_failures = self.notify_watchers(&event).await;
        result.success = true;
        result
    }

    fn snapshots(&self) -> std::sync::MutexGuard<'_, SnapshotRegistry> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watchers(&self) -> std::sync::MutexGuard<'_, BTreeMap<WatcherId, Arc<dyn ConfigWatcher>>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_snapshot(
        &self,
        id: Option<String>,
        config: Value,
        source: &str,
        metadata: Map<String, Value>,
    ) -> String {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut registry = self.snapshots();
        let evicted = registry.insert(ConfigurationSnapshot::new(id.clone(), config, source, metadata));
        for snapshot in &evicted {
            tracing::debug!(snapshot_id = %snapshot.id, "Evicted oldest snapshot");
        }
        metrics::record_snapshot_count(registry.len());
        id
    }

    fn commit(&self, merged: Value) -> CoreResult<()> {
        if !merged.is_object() {
            return Err(CoreError::CommitFailure(
                "configuration root must be an object".to_string(),
            ));
        }
        let size = merged.to_string().len();
        if size > self.max_config_bytes {
            return Err(CoreError::CommitFailure(format!(
                "configuration is {size} bytes, limit is {}",
                self.max_config_bytes
            )));
        }
        self.current.store(Arc::new(merged));
        Ok(())
    }

    /// Restore the pre-update snapshot after a failed commit. Returns a change
    /// event only when the stored value actually differs from `current`.
    fn restore_update_snapshot(
        &self,
        id: &str,
        current: &Arc<Value>,
        source: &str,
    ) -> Option<ConfigChangeEvent> {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        metrics::record_rollback();

        let snapshot = self.snapshots().get(id).cloned()?;
        let live = self.current.load_full();
        if *live == snapshot.config {
            return None;
        }
        self.current.store(Arc::new(snapshot.config.clone()));

        let mut metadata = Map::new();
        metadata.insert("snapshotId".into(), Value::from(id));
        metadata.insert("failedSource".into(), Value::from(source));
        Some(ConfigChangeEvent {
            old_value: live.as_ref().clone(),
            new_value: snapshot.config,
            timestamp: Utc::now(),
            source: ROLLBACK_SOURCE.to_string(),
            metadata,
        })
    }

    async fn notify_watchers(&self, event: &ConfigChangeEvent) -> Vec<String> {
        // Receivers may all be gone; that is not an error.
        let _ = self.events.send(event.clone());

        let watchers: Vec<_> = self
            .watchers()
            .iter()
            .map(|(id, w)| (*id, Arc::clone(w)))
            .collect();

        let outcomes = join_all(watchers.into_iter().map(|(id, watcher)| async move {
            let outcome = AssertUnwindSafe(watcher.on_change(event)).catch_unwind().await;
            (id, outcome)
        }))
        .await;

        let mut failures = Vec::new();
        for (id, outcome) in outcomes {
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "watcher panicked".to_string(),
            };
            tracing::warn!(watcher_id = id, error = %message, "Configuration watcher failed");
            metrics::record_watcher_failure();
            failures.push(format!("watcher {id}: {message}"));
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn manager(initial: Value) -> RuntimeConfigurationManager {
        RuntimeConfigurationManager::new(initial, &ManagerSettings::default())
    }

    #[tokio::test]
    async fn test_initial_snapshot_recorded() {
        let m = manager(json!({"a": 1}));
        let initial = m.get_snapshot("initial").unwrap();
        assert_eq!(initial.source, SYSTEM_SOURCE);
        assert_eq!(initial.config, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_update_merges_and_reports_paths() {
        let m = manager(json!({"server": {"name": "s1", "port": 80}}));
        let result = m
            .update_configuration(json!({"server": {"port": 8080}}), UpdateOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.affected_paths, vec!["server.port"]);
        assert!(result.snapshot_id.is_some());
        assert_eq!(
            m.get_current_configuration(),
            json!({"server": {"name": "s1", "port": 8080}})
        );
        assert_eq!(m.get_runtime_statistics().total_updates, 1);
    }

    #[tokio::test]
    async fn test_update_path() {
        let m = manager(json!({}));
        m.update_configuration_path("a.b.c", json!(true), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(m.get_current_configuration(), json!({"a": {"b": {"c": true}}}));

        let bad = m
            .update_configuration_path("a..c", json!(1), UpdateOptions::default())
            .await
            .unwrap();
        assert!(!bad.success);
        assert!(bad.error.is_some());
    }

    #[tokio::test]
    async fn test_replace_drops_missing_keys() {
        let m = manager(json!({"a": 1, "b": 2}));
        let result = m
            .update_configuration(json!({"a": 1}), UpdateOptions::default().replacing())
            .await
            .unwrap();
        assert_eq!(result.affected_paths, vec!["b"]);
        assert_eq!(m.get_current_configuration(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let m = manager(json!({"a": 1}));
        let result = m
            .update_configuration(json!(["not", "an", "object"]), UpdateOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.rollback_performed);
        assert_eq!(m.get_current_configuration(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_commit_failure_without_rollback_propagates() {
        let settings = ManagerSettings {
            max_config_bytes: 10,
            ..ManagerSettings::default()
        };
        let m = RuntimeConfigurationManager::new(json!({}), &settings);
        let options = UpdateOptions {
            rollback_on_failure: false,
            ..UpdateOptions::default()
        };
        let err = m
            .update_configuration(json!({"long_key": "long value"}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CommitFailure(_)));
        assert!(!m.get_runtime_statistics().lock_held);
    }

    fn small_manager() -> (RuntimeConfigurationManager, Arc<AtomicUsize>) {
        let settings = ManagerSettings {
            max_config_bytes: 40,
            ..ManagerSettings::default()
        };
        let m = RuntimeConfigurationManager::new(json!({"a": 1}), &settings);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        m.watch_configuration(FnWatcher::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        (m, calls)
    }

    fn without_snapshot() -> UpdateOptions {
        UpdateOptions {
            create_snapshot: false,
            ..UpdateOptions::default()
        }
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_unsnapshotted_updates() {
        let (m, calls) = small_manager();
        for n in [2, 3] {
            let result = m
                .update_configuration(json!({"b": n}), without_snapshot())
                .await
                .unwrap();
            assert!(result.success);
        }

        let result = m
            .update_configuration(json!({"big": "x".repeat(64)}), without_snapshot())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(!result.rollback_performed);
        assert!(result.error.is_some());
        assert_eq!(m.get_current_configuration(), json!({"a": 1, "b": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(m.get_runtime_statistics().rollbacks, 0);
        assert_eq!(m.get_runtime_statistics().failed_updates, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_restores_only_its_own_snapshot() {
        let (m, calls) = small_manager();
        m.update_configuration(json!({"b": 2}), without_snapshot())
            .await
            .unwrap();

        let result = m
            .update_configuration(json!({"big": "x".repeat(64)}), UpdateOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.rollback_performed);
        let own = m.get_snapshot(result.snapshot_id.as_deref().unwrap()).unwrap();
        assert_eq!(own.config, json!({"a": 1, "b": 2}));
        // The older "initial" snapshot is not applied.
        assert_eq!(m.get_current_configuration(), json!({"a": 1, "b": 2}));
        // Nothing changed, so nothing extra was announced.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.get_runtime_statistics().rollbacks, 1);
    }

    struct SlowWatcher {
        marks: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ConfigWatcher for SlowWatcher {
        async fn on_change(&self, event: &ConfigChangeEvent) -> Result<(), WatcherError> {
            self.marks.lock().unwrap().push(format!("start:{}", event.source));
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            self.marks.lock().unwrap().push(format!("end:{}", event.source));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notifications_finish_before_next_update() {
        let m = manager(json!({}));
        let marks = Arc::new(Mutex::new(Vec::new()));
        m.watch_configuration(Arc::new(SlowWatcher { marks: marks.clone() }));

        let (first, second) = tokio::join!(
            m.update_configuration(json!({"x": 1}), UpdateOptions::from_source("x")),
            m.update_configuration(json!({"y": 1}), UpdateOptions::from_source("y")),
        );
        assert!(first.unwrap().success);
        assert!(second.unwrap().success);

        let marks = marks.lock().unwrap().clone();
        assert_eq!(marks.len(), 4);
        for pair in marks.chunks(2) {
            let started = pair[0].strip_prefix("start:").unwrap();
            let ended = pair[1].strip_prefix("end:").unwrap();
            assert_eq!(started, ended, "interleaved notifications: {marks:?}");
        }
    }

    #[tokio::test]
    async fn test_watcher_failures_are_isolated() {
        let m = manager(json!({}));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        m.watch_configuration(FnWatcher::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        m.watch_configuration(FnWatcher::new(|_| Err("boom".into())));
        m.watch_configuration(FnWatcher::new(|_| panic!("watcher bug")));

        let result = m
            .update_configuration(json!({"x": 1}), UpdateOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.watcher_failures.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.get_current_configuration(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_unwatch() {
        let m = manager(json!({}));
        let id = m.watch_configuration(FnWatcher::new(|_| Ok(())));
        assert_eq!(m.get_runtime_statistics().watcher_count, 1);
        assert!(m.unwatch_configuration(id));
        assert!(!m.unwatch_configuration(id));
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let m = manager(json!({}));
        let mut rx = m.subscribe();
        m.update_configuration(json!({"k": "v"}), UpdateOptions::from_source("test"))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "test");
        assert_eq!(event.new_value, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn test_rollback_unknown_snapshot() {
        let m = manager(json!({}));
        let result = m.rollback_to_snapshot("nope").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let m = manager(json!({"a": 1}));
        m.update_configuration(json!({"b": 2}), UpdateOptions::default())
            .await
            .unwrap();
        let state = m.export_state().await;

        let other = manager(json!({}));
        let result = other.import_state(state.clone()).await;
        assert!(result.success);
        assert_eq!(other.get_current_configuration(), json!({"a": 1, "b": 2}));
        assert_eq!(other.list_snapshots(), state.snapshots);
        assert_eq!(other.get_runtime_statistics().total_updates, 1);
    }
}
