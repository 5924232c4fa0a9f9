//! Debounced hot reload of external configuration documents.
//!
//! # Data Flow
//! ```text
//! ChangeSource::watch ──▶ signal channel ──▶ signal(key)
//!     → abort pending task for key, schedule a new one after `debounce`
//!     → fire: candidate from signal or ChangeSource::load
//!     → validate deep_merge(current, candidate)
//!     → update_configuration(source = "hot-reload:<key>")
//!     → HotReloadEvent to listeners
//! ```
//!
//! # Design Decisions
//! - One pending task per key; the newest signal always wins
//! - A task leaves the pending map before it fires, so `stop` aborts only
//!   timers and never an update that already holds the configuration lock

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::hot_reload::source::{ChangeSignal, ChangeSource, SignalOrigin};
use crate::observability::metrics;
use crate::runtime::{deep_merge, RuntimeConfigurationManager, UpdateOptions, ValidationResult};
use crate::settings::HotReloadSettings;

/// Prefix of the update source used for hot reloads.
pub const HOT_RELOAD_SOURCE_PREFIX: &str = "hot-reload:";

/// Outcome of one fired reload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HotReloadEvent {
    #[serde(rename_all = "camelCase")]
    Reloaded {
        key: String,
        timestamp: DateTime<Utc>,
        affected_paths: Vec<String>,
        snapshot_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ValidationFailed {
        key: String,
        timestamp: DateTime<Utc>,
        validation: ValidationResult,
    },
    LoadFailed {
        key: String,
        timestamp: DateTime<Utc>,
        error: String,
    },
    ApplyFailed {
        key: String,
        timestamp: DateTime<Utc>,
        error: String,
    },
    Unchanged {
        key: String,
        timestamp: DateTime<Utc>,
    },
}

impl HotReloadEvent {
    pub fn key(&self) -> &str {
        match self {
            HotReloadEvent::Reloaded { key, .. }
            | HotReloadEvent::ValidationFailed { key, .. }
            | HotReloadEvent::LoadFailed { key, .. }
            | HotReloadEvent::ApplyFailed { key, .. }
            | HotReloadEvent::Unchanged { key, .. } => key,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            HotReloadEvent::Reloaded { .. } => "reloaded",
            HotReloadEvent::ValidationFailed { .. } => "validation_failed",
            HotReloadEvent::LoadFailed { .. } => "load_failed",
            HotReloadEvent::ApplyFailed { .. } => "apply_failed",
            HotReloadEvent::Unchanged { .. } => "unchanged",
        }
    }

    fn load_failed(key: &str, error: impl ToString) -> Self {
        HotReloadEvent::LoadFailed {
            key: key.to_string(),
            timestamp: Utc::now(),
            error: error.to_string(),
        }
    }
}

/// Callback invoked for every fired reload.
pub type HotReloadListener = Arc<dyn Fn(&HotReloadEvent) + Send + Sync>;

/// Counters exposed through the admin API.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotReloadStatus {
    pub running: bool,
    pub sources: Vec<String>,
    pub pending: usize,
    pub reloads: u64,
    pub failures: u64,
    pub last_reload: Option<DateTime<Utc>>,
}

struct Runtime {
    shutdown: broadcast::Sender<()>,
    signals: mpsc::UnboundedSender<ChangeSignal>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct HotReloadCoordinator {
    settings: HotReloadSettings,
    manager: Arc<RuntimeConfigurationManager>,
    sources: DashMap<String, Arc<dyn ChangeSource>>,
    pending: DashMap<String, (u64, JoinHandle<()>)>,
    generation: AtomicU64,
    listeners: Mutex<BTreeMap<u64, HotReloadListener>>,
    next_listener: AtomicU64,
    running: AtomicBool,
    runtime: Mutex<Option<Runtime>>,
    reloads: AtomicU64,
    failures: AtomicU64,
    last_reload: Mutex<Option<DateTime<Utc>>>,
}

impl HotReloadCoordinator {
    pub fn new(settings: HotReloadSettings, manager: Arc<RuntimeConfigurationManager>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            manager,
            sources: DashMap::new(),
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(0),
            running: AtomicBool::new(false),
            runtime: Mutex::new(None),
            reloads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_reload: Mutex::new(None),
        })
    }

    fn debounce(&self) -> Duration {
        Duration::from_millis(self.settings.debounce_ms)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a change source. Sources added while running start watching
    /// immediately.
    pub fn add_source(&self, source: Arc<dyn ChangeSource>) {
        let key = source.key();
        tracing::debug!(key = %key, "Hot reload source registered");
        self.sources.insert(key, Arc::clone(&source));

        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rt) = runtime.as_mut() {
            let task = spawn_watch(source, rt.signals.clone(), rt.shutdown.subscribe());
            rt.tasks.push(task);
        }
    }

    pub fn source_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.iter().map(|s| s.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Start all source watchers and the signal dispatcher.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown, _) = broadcast::channel(1);
        let (signals, mut rx) = mpsc::unbounded_channel::<ChangeSignal>();

        let weak: Weak<Self> = Arc::downgrade(self);
        let dispatcher = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(this) = weak.upgrade() else { break };
                this.signal(signal);
            }
        });

        let mut tasks = vec![dispatcher];
        for source in self.sources.iter() {
            tasks.push(spawn_watch(
                Arc::clone(source.value()),
                signals.clone(),
                shutdown.subscribe(),
            ));
        }

        *self.runtime.lock().unwrap_or_else(PoisonError::into_inner) = Some(Runtime {
            shutdown,
            signals,
            tasks,
        });
        tracing::info!(
            sources = self.sources.len(),
            debounce_ms = self.settings.debounce_ms,
            "Hot reload coordinator started"
        );
    }

    /// Stop watching and cancel every pending reload.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(rt) = runtime {
            let _ = rt.shutdown.send(());
            for task in rt.tasks {
                task.abort();
            }
        }

        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, (_, handle))) = self.pending.remove(&key) {
                handle.abort();
            }
        }
        tracing::info!("Hot reload coordinator stopped");
    }

    pub fn on_hot_reload<F>(&self, listener: F) -> u64
    where
        F: Fn(&HotReloadEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        id
    }

    pub fn off_hot_reload(&self, id: u64) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Number of keys with a reload waiting for its quiet period.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Debounce a change signal. Ignored while stopped.
    pub fn signal(self: &Arc<Self>, signal: ChangeSignal) {
        if !self.is_running() {
            tracing::debug!(key = %signal.key, "Hot reload stopped, signal ignored");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let key = signal.key.clone();
        let delay = self.debounce();
        let weak = Arc::downgrade(self);

        // The entry guard is held across spawn so the task cannot look up
        // its generation before it is recorded.
        let entry = self.pending.entry(key.clone());
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else { return };
            if this
                .pending
                .remove_if(&task_key, |_, (g, _)| *g == generation)
                .is_none()
            {
                return;
            }
            if !this.is_running() {
                return;
            }
            this.fire(signal).await;
        });
        let previous = match entry {
            Entry::Occupied(mut occupied) => Some(occupied.insert((generation, handle))),
            Entry::Vacant(vacant) => {
                vacant.insert((generation, handle));
                None
            }
        };
        if let Some((_, previous)) = previous {
            previous.abort();
        }
        tracing::trace!(key = %key, generation, "Hot reload scheduled");
    }

    /// Reload one source now, bypassing and cancelling its debounce.
    pub async fn trigger_reload(&self, key: &str) -> HotReloadEvent {
        if let Some((_, (_, handle))) = self.pending.remove(key) {
            handle.abort();
        }
        self.fire(ChangeSignal::new(key, SignalOrigin::Manual)).await
    }

    async fn fire(&self, signal: ChangeSignal) -> HotReloadEvent {
        let event = self.apply(signal).await;
        match &event {
            HotReloadEvent::Reloaded { .. } => {
                self.reloads.fetch_add(1, Ordering::Relaxed);
                *self.last_reload.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
            }
            HotReloadEvent::Unchanged { .. } => {}
            _ => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        metrics::record_hot_reload(event.key(), event.outcome());
        self.emit(&event);
        event
    }

    async fn apply(&self, signal: ChangeSignal) -> HotReloadEvent {
        let key = signal.key.as_str();

        let candidate: Value = match signal.candidate {
            Some(candidate) => candidate,
            None => {
                let Some(source) = self.sources.get(key).map(|s| Arc::clone(s.value())) else {
                    return HotReloadEvent::load_failed(key, CoreError::not_found("hot reload source", key));
                };
                match source.load().await {
                    Ok(Some(candidate)) => candidate,
                    Ok(None) => {
                        return HotReloadEvent::Unchanged {
                            key: key.to_string(),
                            timestamp: Utc::now(),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Hot reload load failed");
                        return HotReloadEvent::load_failed(key, e);
                    }
                }
            }
        };

        if self.settings.validate && self.settings.rollback_on_error {
            let merged = deep_merge(&self.manager.current(), &candidate);
            let validation = self.manager.validate_candidate(&merged).await;
            if !validation.is_valid {
                tracing::warn!(
                    key = %key,
                    errors = %validation.summary(),
                    "Hot reload candidate discarded"
                );
                return HotReloadEvent::ValidationFailed {
                    key: key.to_string(),
                    timestamp: Utc::now(),
                    validation,
                };
            }
        }

        let options = UpdateOptions {
            validate: self.settings.validate,
            ..UpdateOptions::from_source(format!("{HOT_RELOAD_SOURCE_PREFIX}{key}"))
        }
        .with_metadata("origin", origin_metadata(&signal.origin));

        match self.manager.update_configuration(candidate, options).await {
            Ok(result) if result.success => {
                tracing::info!(
                    key = %key,
                    paths = result.affected_paths.len(),
                    "Configuration hot reloaded"
                );
                HotReloadEvent::Reloaded {
                    key: key.to_string(),
                    timestamp: result.timestamp,
                    affected_paths: result.affected_paths,
                    snapshot_id: result.snapshot_id,
                }
            }
            Ok(result) => match result.validation {
                Some(validation) if !validation.is_valid => HotReloadEvent::ValidationFailed {
                    key: key.to_string(),
                    timestamp: result.timestamp,
                    validation,
                },
                _ => HotReloadEvent::ApplyFailed {
                    key: key.to_string(),
                    timestamp: result.timestamp,
                    error: result.error.unwrap_or_else(|| "update not applied".to_string()),
                },
            },
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Hot reload commit failed");
                HotReloadEvent::ApplyFailed {
                    key: key.to_string(),
                    timestamp: Utc::now(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn emit(&self, event: &HotReloadEvent) {
        let listeners: Vec<HotReloadListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(key = %event.key(), "Hot reload listener panicked");
            }
        }
    }

    pub fn get_status(&self) -> HotReloadStatus {
        HotReloadStatus {
            running: self.is_running(),
            sources: self.source_keys(),
            pending: self.pending.len(),
            reloads: self.reloads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_reload: *self.last_reload.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

fn spawn_watch(
    source: Arc<dyn ChangeSource>,
    signals: mpsc::UnboundedSender<ChangeSignal>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = source.watch(signals, shutdown).await {
            tracing::error!(key = %source.key(), error = %e, "Change source stopped");
        }
    })
}

fn origin_metadata(origin: &SignalOrigin) -> Value {
    match origin {
        SignalOrigin::File { path, size, mtime } => serde_json::json!({
            "kind": "file",
            "path": path.display().to_string(),
            "size": size,
            "mtime": mtime,
        }),
        SignalOrigin::Remote { source } => serde_json::json!({ "kind": "remote", "source": source }),
        SignalOrigin::Manual => serde_json::json!({ "kind": "manual" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ValidationIssue;
    use crate::settings::ManagerSettings;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSource {
        key: String,
        value: Mutex<Option<Value>>,
    }

    #[async_trait]
    impl ChangeSource for StaticSource {
        fn key(&self) -> String {
            self.key.clone()
        }

        async fn watch(
            &self,
            _signals: mpsc::UnboundedSender<ChangeSignal>,
            mut shutdown: broadcast::Receiver<()>,
        ) -> crate::error::CoreResult<()> {
            let _ = shutdown.recv().await;
            Ok(())
        }

        async fn load(&self) -> crate::error::CoreResult<Option<Value>> {
            Ok(self.value.lock().unwrap().clone())
        }
    }

    fn settings(debounce_ms: u64) -> HotReloadSettings {
        HotReloadSettings {
            debounce_ms,
            ..HotReloadSettings::default()
        }
    }

    fn manager() -> Arc<RuntimeConfigurationManager> {
        Arc::new(RuntimeConfigurationManager::new(
            json!({"feature": {"enabled": false}}),
            &ManagerSettings::default(),
        ))
    }

    fn collect(coordinator: &HotReloadCoordinator) -> Arc<Mutex<Vec<HotReloadEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        coordinator.on_hot_reload(move |e| sink.lock().unwrap().push(e.clone()));
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_debounces_to_last_signal() {
        let manager = manager();
        let coordinator = HotReloadCoordinator::new(settings(100), Arc::clone(&manager));
        let events = collect(&coordinator);
        coordinator.start();

        for i in 0..20 {
            coordinator.signal(
                ChangeSignal::new("app.json", SignalOrigin::Manual).with_candidate(json!({"n": i})),
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HotReloadEvent::Reloaded { .. }));
        assert_eq!(manager.get_current_configuration()["n"], 19);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_candidate_is_discarded() {
        let validator = |config: &Value| {
            if config["feature"]["enabled"].is_boolean() {
                ValidationResult::valid()
            } else {
                ValidationResult::from_issues(
                    vec![ValidationIssue::new("feature.enabled", "must be a boolean")],
                    Vec::new(),
                )
            }
        };
        let manager = Arc::new(
            RuntimeConfigurationManager::new(json!({"feature": {"enabled": false}}), &ManagerSettings::default())
                .with_validator(Arc::new(validator)),
        );
        let coordinator = HotReloadCoordinator::new(settings(50), Arc::clone(&manager));
        let events = collect(&coordinator);
        coordinator.start();

        coordinator.signal(
            ChangeSignal::new("app.json", SignalOrigin::Manual)
                .with_candidate(json!({"feature": {"enabled": "yes"}})),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = events.lock().unwrap();
        assert!(matches!(events[0], HotReloadEvent::ValidationFailed { .. }));
        assert_eq!(manager.get_current_configuration()["feature"]["enabled"], false);
        assert_eq!(coordinator.get_status().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending() {
        let manager = manager();
        let coordinator = HotReloadCoordinator::new(settings(100), Arc::clone(&manager));
        let events = collect(&coordinator);
        coordinator.start();

        coordinator.signal(ChangeSignal::new("k", SignalOrigin::Manual).with_candidate(json!({"n": 1})));
        coordinator.stop();
        tokio::time::sleep(Duration::from_millis(200)).await;

        coordinator.signal(ChangeSignal::new("k", SignalOrigin::Manual).with_candidate(json!({"n": 2})));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(events.lock().unwrap().is_empty());
        assert!(manager.get_current_configuration().get("n").is_none());
    }

    #[tokio::test]
    async fn test_trigger_reload_loads_from_source() {
        let manager = manager();
        let coordinator = HotReloadCoordinator::new(settings(500), Arc::clone(&manager));
        coordinator.add_source(Arc::new(StaticSource {
            key: "static".to_string(),
            value: Mutex::new(Some(json!({"feature": {"enabled": true}}))),
        }));

        let event = coordinator.trigger_reload("static").await;
        assert!(matches!(event, HotReloadEvent::Reloaded { .. }));
        assert_eq!(manager.get_current_configuration()["feature"]["enabled"], true);
        let snapshots = manager.list_snapshots();
        assert!(snapshots.iter().any(|s| s.source == "hot-reload:static"));

        let missing = coordinator.trigger_reload("unknown").await;
        assert!(matches!(missing, HotReloadEvent::LoadFailed { .. }));
    }

    #[tokio::test]
    async fn test_unchanged_source_and_listener_removal() {
        let coordinator = HotReloadCoordinator::new(settings(500), manager());
        coordinator.add_source(Arc::new(StaticSource {
            key: "remote".to_string(),
            value: Mutex::new(None),
        }));
        let events = collect(&coordinator);

        let event = coordinator.trigger_reload("remote").await;
        assert!(matches!(event, HotReloadEvent::Unchanged { .. }));
        assert_eq!(events.lock().unwrap().len(), 1);

        assert!(coordinator.off_hot_reload(1));
        assert!(!coordinator.off_hot_reload(1));
        coordinator.trigger_reload("remote").await;
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
