//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the initial configuration document
//! - Build every subsystem in dependency order and wire their watchers
//! - Start and stop the background tasks
//!
//! # Design Decisions
//! - Fail fast: an unreadable initial document is fatal
//! - Nothing is global; [`ConfigCore`] owns `Arc`s that callers clone
//! - Stop order is the reverse of start order

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::audit::{AuditTrail, AuditWatcher, JsonFileStore};
use crate::cache::{CacheLayer, PathInvalidator};
use crate::error::CoreResult;
use crate::hot_reload::{load_document, FileChangeSource, HotReloadCoordinator, RemoteChangeSource};
use crate::lifecycle::Shutdown;
use crate::runtime::{RuleValidator, RuntimeConfigurationManager};
use crate::settings::CoreSettings;
use crate::sync::{InProcessBus, PubSubTransport, SyncCoordinator};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// The assembled configuration core.
pub struct ConfigCore {
    pub settings: CoreSettings,
    pub manager: Arc<RuntimeConfigurationManager>,
    pub cache: Arc<CacheLayer>,
    pub audit: Arc<AuditTrail>,
    pub hot_reload: Arc<HotReloadCoordinator>,
    pub sync: Option<Arc<SyncCoordinator>>,
    pub shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConfigCore {
    /// Load `config_path` (or start from `{}`) and build the core on an
    /// in-process sync bus.
    pub async fn bootstrap(settings: CoreSettings) -> CoreResult<Self> {
        let initial = match &settings.config_path {
            Some(path) => {
                let value = load_document(Path::new(path)).await?;
                tracing::info!(path = %path, "Initial configuration loaded");
                value
            }
            None => json!({}),
        };
        Self::build(settings, initial, Arc::new(InProcessBus::new())).await
    }

    /// Build the core around an explicit initial value and transport.
    pub async fn build(
        settings: CoreSettings,
        initial: Value,
        transport: Arc<dyn PubSubTransport>,
    ) -> CoreResult<Self> {
        let validator = settings
            .manager
            .required_paths
            .iter()
            .fold(RuleValidator::new(), |v, path| v.require(path));
        let validator = settings
            .manager
            .deprecated_paths
            .iter()
            .fold(validator, |v, path| v.deprecated(path, "deprecated setting"));

        let manager = Arc::new(
            RuntimeConfigurationManager::new(initial, &settings.manager).with_validator(Arc::new(validator)),
        );

        let cache = Arc::new(CacheLayer::new(settings.cache.clone()));
        manager.watch_configuration(Arc::new(PathInvalidator::new(Arc::clone(&cache))));

        let mut audit = AuditTrail::new(&settings.audit);
        if let Some(path) = &settings.audit.store_path {
            audit = audit.with_store(Arc::new(JsonFileStore::new(PathBuf::from(path))));
        }
        if let Some(path) = &settings.audit.archive_path {
            audit = audit.with_archive(Arc::new(JsonFileStore::new(PathBuf::from(path))));
        }
        let audit = Arc::new(audit);
        audit.load_from_store().await;
        if settings.audit.enabled {
            manager.watch_configuration(Arc::new(AuditWatcher::new(Arc::clone(&audit))));
        }

        let hot_reload = HotReloadCoordinator::new(settings.hot_reload.clone(), Arc::clone(&manager));
        if settings.hot_reload.enabled {
            let files = settings.config_path.iter().chain(settings.hot_reload.watch_paths.iter());
            for path in files {
                hot_reload.add_source(Arc::new(FileChangeSource::new(path)));
            }
            let poll_interval = Duration::from_millis(settings.hot_reload.poll_interval_ms);
            for remote in &settings.hot_reload.remote_sources {
                hot_reload.add_source(Arc::new(RemoteChangeSource::new(
                    remote.name.clone(),
                    remote.url.clone(),
                    poll_interval,
                )));
            }
        }

        let sync = settings.sync.enabled.then(|| {
            SyncCoordinator::new(
                settings.instance_id.clone(),
                settings.sync.clone(),
                Arc::clone(&manager),
                transport,
            )
        });

        tracing::info!(
            instance_id = %settings.instance_id,
            hot_reload = settings.hot_reload.enabled,
            sync = settings.sync.enabled,
            audit = settings.audit.enabled,
            "Configuration core built"
        );

        Ok(Self {
            settings,
            manager,
            cache,
            audit,
            hot_reload,
            sync,
            shutdown: Shutdown::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start hot reload, sync and the maintenance sweeps.
    pub async fn start(&self) -> CoreResult<()> {
        if self.settings.hot_reload.enabled {
            self.hot_reload.start();
        }
        if let Some(sync) = &self.sync {
            sync.start().await?;
        }

        let tasks = vec![
            spawn_cache_sweep(Arc::clone(&self.cache), self.shutdown.clone()),
            spawn_retention(Arc::clone(&self.audit), self.shutdown.clone()),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
        tracing::info!("Configuration core started");
        Ok(())
    }

    /// Stop background work in reverse start order.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
        if let Some(sync) = &self.sync {
            sync.stop().await;
        }
        self.hot_reload.stop();
        tracing::info!("Configuration core stopped");
    }
}

fn spawn_cache_sweep(cache: Arc<CacheLayer>, shutdown: Shutdown) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Expired cache entries swept");
                    }
                }
            }
        }
    })
}

fn spawn_retention(audit: Arc<AuditTrail>, shutdown: Shutdown) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = ticker.tick() => {
                    let report = audit.enforce_retention_policy().await;
                    tracing::debug!(?report, "Audit retention enforced");
                }
            }
        }
    })
}
