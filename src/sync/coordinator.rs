//! Multi-instance synchronization.
//!
//! # Responsibilities
//! - Stamp local state with a monotonically increasing version
//! - Push local changes to peers and pull theirs on demand
//! - Detect divergence by checksum and resolve it per strategy
//! - Track peers and their status through periodic sync rounds
//!
//! # Design Decisions
//! - Remote state is applied through the runtime manager like any other
//!   update (source `sync:<peer>`), so validation, snapshots and auditing
//!   cover it
//! - Changes that arrived via sync are never pushed back out
//! - Internal state sits behind a `std::sync::Mutex` never held across await

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::error::CoreResult;
use crate::observability::metrics;
use crate::runtime::manager::{
    ConfigChangeEvent, ConfigWatcher, RuntimeConfigurationManager, UpdateOptions, WatcherError,
    WatcherId,
};
use crate::settings::SyncSettings;
use crate::sync::conflict::{resolve, ConfigurationConflict, ConflictStrategy, Resolution};
use crate::sync::peer::{Peer, PeerRegistry, PeerStatus};
use crate::sync::transport::{PubSubTransport, SubscriptionId, SyncMessage, SyncMessageKind};
use crate::sync::version::{checksum, ConfigurationVersion};

/// Source prefix for updates applied from peers.
pub const SYNC_SOURCE_PREFIX: &str = "sync:";

/// What happened to one piece of remote state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum SyncOutcome {
    /// Checksums already matched.
    InSync,
    /// Remote state replaced local state.
    Applied { version: u64 },
    /// Local state was kept.
    KeptLocal,
    /// A merged value was applied and pushed.
    Merged { version: u64 },
    /// Manual strategy: parked for an external decision.
    Unresolved,
    /// The manager refused the remote state.
    Rejected { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub attempted: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub instance_id: String,
    pub running: bool,
    pub strategy: ConflictStrategy,
    pub local_version: ConfigurationVersion,
    pub peers_total: usize,
    pub peers_online: usize,
    pub peers_syncing: usize,
    pub peers_offline: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub pushes: u64,
    pub pulls: u64,
    pub remote_applied: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub pending_conflicts: usize,
}

struct SyncState {
    local_version: ConfigurationVersion,
    last_sync: Option<DateTime<Utc>>,
    pending_conflicts: Vec<ConfigurationConflict>,
    pushes: u64,
    pulls: u64,
    remote_applied: u64,
    conflicts_detected: u64,
    conflicts_resolved: u64,
}

#[derive(Default)]
struct Runtime {
    tasks: Vec<JoinHandle<()>>,
    subscription: Option<SubscriptionId>,
    watcher: Option<WatcherId>,
}

/// Keeps this instance's configuration aligned with its peers.
pub struct SyncCoordinator {
    instance_id: String,
    settings: SyncSettings,
    manager: Arc<RuntimeConfigurationManager>,
    transport: Arc<dyn PubSubTransport>,
    peers: PeerRegistry,
    state: Mutex<SyncState>,
    runtime: Mutex<Runtime>,
    running: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        instance_id: impl Into<String>,
        settings: SyncSettings,
        manager: Arc<RuntimeConfigurationManager>,
        transport: Arc<dyn PubSubTransport>,
    ) -> Arc<Self> {
        let instance_id = instance_id.into();
        let local_version = ConfigurationVersion::initial(&instance_id, &manager.current());
        let peers = PeerRegistry::new();
        for peer in &settings.peers {
            if let Err(e) = peers.add(&peer.id, &peer.endpoint) {
                tracing::warn!(peer_id = %peer.id, error = %e, "Ignoring configured peer");
            }
        }

        Arc::new(Self {
            instance_id,
            settings,
            manager,
            transport,
            peers,
            state: Mutex::new(SyncState {
                local_version,
                last_sync: None,
                pending_conflicts: Vec::new(),
                pushes: 0,
                pulls: 0,
                remote_applied: 0,
                conflicts_detected: 0,
                conflicts_resolved: 0,
            }),
            runtime: Mutex::new(Runtime::default()),
            running: AtomicBool::new(false),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the channel, announce this instance and start the sync loop.
    pub async fn start(self: &Arc<Self>) -> CoreResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut subscription = self.transport.subscribe(&self.settings.channel).await?;
        let weak = Arc::downgrade(self);
        let receiver_task = tokio::spawn(async move {
            while let Some(message) = subscription.receiver.recv().await {
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.handle_message(message).await;
            }
        });

        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.settings.sync_interval_ms.max(1));
        let sync_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.sync_round().await;
            }
        });

        let watcher = self
            .settings
            .auto_push
            .then(|| self.manager.watch_configuration(Arc::new(SyncWatcher::new(Arc::downgrade(self)))));

        {
            let mut runtime = self.runtime();
            runtime.tasks = vec![receiver_task, sync_task];
            runtime.subscription = Some(subscription.id);
            runtime.watcher = watcher;
        }

        self.publish(self.beacon(SyncMessageKind::Discovery)).await?;
        tracing::info!(
            instance_id = %self.instance_id,
            channel = %self.settings.channel,
            peers = self.peers.len(),
            "Sync coordinator started"
        );
        Ok(())
    }

    /// Cancel the sync loop and leave the channel. In-flight updates finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let runtime = std::mem::take(&mut *self.runtime());
        for task in runtime.tasks {
            task.abort();
        }
        if let Some(id) = runtime.watcher {
            self.manager.unwatch_configuration(id);
        }
        if let Some(id) = runtime.subscription {
            if let Err(e) = self.transport.unsubscribe(&self.settings.channel, id).await {
                tracing::warn!(error = %e, "Failed to unsubscribe from sync channel");
            }
        }
        tracing::info!(instance_id = %self.instance_id, "Sync coordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn add_peer(&self, id: &str, endpoint: &str) -> CoreResult<Peer> {
        let peer = self.peers.add(id, endpoint)?;
        metrics::record_peer_count(self.peers.len());
        tracing::info!(peer_id = %id, endpoint = %endpoint, "Peer added");
        Ok(peer)
    }

    pub fn remove_peer(&self, id: &str) -> bool {
        let removed = self.peers.remove(id).is_some();
        metrics::record_peer_count(self.peers.len());
        removed
    }

    pub fn get_peers(&self) -> Vec<Peer> {
        self.peers.list()
    }

    /// Stamp `config` (or the current configuration) with the next version and publish it.
    pub async fn push_configuration(&self, config: Option<Value>) -> CoreResult<ConfigurationVersion> {
        let config = config.unwrap_or_else(|| self.manager.get_current_configuration());
        let version = {
            let mut state = self.state();
            state.local_version = state.local_version.next(&config);
            state.pushes += 1;
            state.local_version.clone()
        };
        tracing::debug!(version = version.version, checksum = %version.checksum, "Pushing configuration");
        self.publish(
            SyncMessage::new(SyncMessageKind::ConfigUpdate, &self.instance_id, config)
                .with_version(version.clone()),
        )
        .await?;
        Ok(version)
    }

    /// Ask every peer for its state; answers arrive asynchronously.
    pub async fn pull_configuration(&self) -> CoreResult<()> {
        self.state().pulls += 1;
        self.publish(SyncMessage::new(SyncMessageKind::SyncRequest, &self.instance_id, Value::Null))
            .await
    }

    /// Exchange state with every known peer, waiting up to the response timeout.
    pub async fn perform_sync(&self) -> SyncReport {
        let mut attempted = Vec::new();
        for peer in self.peers.list() {
            if peer.status == PeerStatus::Syncing {
                continue;
            }
            if self.peers.transition(&peer.id, PeerStatus::Syncing).is_err() {
                continue;
            }
            let request = SyncMessage::new(SyncMessageKind::SyncRequest, &self.instance_id, Value::Null)
                .to(peer.id.as_str());
            if let Err(e) = self.publish(request).await {
                tracing::warn!(peer_id = %peer.id, error = %e, "Sync request failed");
                let _ = self.peers.transition(&peer.id, PeerStatus::Offline);
                continue;
            }
            attempted.push(peer.id);
        }

        if !attempted.is_empty() {
            tokio::time::sleep(Duration::from_millis(self.settings.response_timeout_ms)).await;
        }

        let mut report = SyncReport {
            attempted: attempted.len(),
            ..SyncReport::default()
        };
        for id in &attempted {
            match self.peers.get(id).map(|p| p.status) {
                Some(PeerStatus::Online) => report.online += 1,
                Some(PeerStatus::Syncing) => {
                    let _ = self.peers.transition(id, PeerStatus::Offline);
                    tracing::info!(peer_id = %id, "Peer did not answer sync request");
                    report.offline += 1;
                }
                _ => report.offline += 1,
            }
        }
        self.state().last_sync = Some(Utc::now());
        report
    }

    /// Resolve with `strategy`, falling back to the configured default.
    pub fn resolve_conflict(
        &self,
        conflict: ConfigurationConflict,
        strategy: Option<ConflictStrategy>,
    ) -> ConfigurationConflict {
        resolve(conflict, strategy.unwrap_or(self.settings.strategy))
    }

    /// Conflicts left for an external decision, oldest first.
    pub fn pending_conflicts(&self) -> Vec<ConfigurationConflict> {
        self.state().pending_conflicts.clone()
    }

    /// Remove and return the parked conflicts.
    pub fn take_pending_conflicts(&self) -> Vec<ConfigurationConflict> {
        std::mem::take(&mut self.state().pending_conflicts)
    }

    pub fn local_version(&self) -> ConfigurationVersion {
        self.state().local_version.clone()
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            instance_id: self.instance_id.clone(),
            running: self.is_running(),
            strategy: self.settings.strategy,
            local_version: state.local_version.clone(),
            peers_total: self.peers.len(),
            peers_online: self.peers.count(PeerStatus::Online),
            peers_syncing: self.peers.count(PeerStatus::Syncing),
            peers_offline: self.peers.count(PeerStatus::Offline),
            last_sync: state.last_sync,
            pushes: state.pushes,
            pulls: state.pulls,
            remote_applied: state.remote_applied,
            conflicts_detected: state.conflicts_detected,
            conflicts_resolved: state.conflicts_resolved,
            pending_conflicts: state.pending_conflicts.len(),
        }
    }

    /// Reconcile a remote configuration with local state.
    pub async fn apply_remote(
        &self,
        peer_id: &str,
        remote_value: Value,
        remote_version: ConfigurationVersion,
    ) -> SyncOutcome {
        let local_value = self.manager.get_current_configuration();
        if checksum(&local_value) == remote_version.checksum {
            return SyncOutcome::InSync;
        }

        let local_version = {
            let mut state = self.state();
            state.conflicts_detected += 1;
            state.local_version.clone()
        };
        let strategy = self.settings.strategy;
        metrics::record_sync_conflict(strategy.as_str());

        let conflict = self.resolve_conflict(
            ConfigurationConflict::new(local_value, remote_value, local_version, remote_version.clone()),
            None,
        );
        tracing::debug!(
            peer_id = %peer_id,
            strategy = %strategy,
            resolution = ?conflict.resolution,
            "Configuration divergence"
        );

        let resolved = match (conflict.resolution, conflict.resolved_value.clone()) {
            (Resolution::Remote | Resolution::Merged, Some(value)) => value,
            (Resolution::Local, _) => {
                self.state().conflicts_resolved += 1;
                return SyncOutcome::KeptLocal;
            }
            _ => {
                tracing::warn!(peer_id = %peer_id, path = %conflict.path, "Conflict needs manual resolution");
                self.state().pending_conflicts.push(conflict);
                return SyncOutcome::Unresolved;
            }
        };

        let options = UpdateOptions::from_source(format!("{SYNC_SOURCE_PREFIX}{peer_id}"))
            .replacing()
            .with_metadata("remoteVersion", json!(remote_version.version));
        let result = match self.manager.update_configuration(resolved.clone(), options).await {
            Ok(result) if result.success => result,
            Ok(result) => {
                let reason = result.error.unwrap_or_else(|| "update rejected".to_string());
                tracing::warn!(peer_id = %peer_id, reason = %reason, "Remote configuration rejected");
                return SyncOutcome::Rejected { reason };
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "Remote configuration commit failed");
                return SyncOutcome::Rejected { reason: e.to_string() };
            }
        };
        tracing::info!(
            peer_id = %peer_id,
            paths = result.affected_paths.len(),
            remote_version = remote_version.version,
            "Applied remote configuration"
        );

        let resolved_checksum = checksum(&resolved);
        let merged = resolved_checksum != remote_version.checksum;
        let applied = {
            let mut state = self.state();
            state.remote_applied += 1;
            state.conflicts_resolved += 1;
            let base = state.local_version.version.max(remote_version.version);
            // A merged state has not been versioned by either side yet.
            let (version, timestamp) = if merged {
                state.pushes += 1;
                (base + 1, Utc::now())
            } else {
                (base, remote_version.timestamp)
            };
            state.local_version = ConfigurationVersion {
                version,
                timestamp,
                instance_id: self.instance_id.clone(),
                checksum: resolved_checksum,
                metadata: Default::default(),
            };
            state.local_version.clone()
        };

        if !merged {
            return SyncOutcome::Applied {
                version: remote_version.version,
            };
        }
        // Merged state exists nowhere else yet.
        let version = applied.version;
        let message = SyncMessage::new(SyncMessageKind::ConfigUpdate, &self.instance_id, resolved)
            .with_version(applied);
        if let Err(e) = self.publish(message).await {
            tracing::warn!(error = %e, "Failed to push merged configuration");
        }
        SyncOutcome::Merged { version }
    }

    async fn handle_message(&self, message: SyncMessage) {
        if !message.is_for(&self.instance_id) {
            return;
        }
        metrics::record_sync_message("in", message.kind.as_str());
        let from = message.instance_id.clone();

        match message.kind {
            SyncMessageKind::Discovery | SyncMessageKind::Heartbeat => {
                self.register_sender(&message);
                if message.kind == SyncMessageKind::Discovery {
                    // Let the newcomer learn about us without waiting for a heartbeat.
                    if let Err(e) = self.publish(self.beacon(SyncMessageKind::Heartbeat).to(from.as_str())).await {
                        tracing::debug!(error = %e, "Failed to answer discovery");
                    }
                }
            }
            SyncMessageKind::SyncRequest => {
                let response = SyncMessage::new(
                    SyncMessageKind::SyncResponse,
                    &self.instance_id,
                    self.manager.get_current_configuration(),
                )
                .with_version(self.local_version())
                .to(from.as_str());
                if let Err(e) = self.publish(response).await {
                    tracing::warn!(peer_id = %from, error = %e, "Failed to answer sync request");
                }
            }
            SyncMessageKind::SyncResponse | SyncMessageKind::ConfigUpdate => {
                if self.peers.contains(&from) {
                    self.peers.touch(&from, message.version.clone());
                    if let Err(e) = self.peers.mark_reachable(&from) {
                        tracing::debug!(peer_id = %from, error = %e, "Peer status unchanged");
                    }
                }
                let Some(version) = message.version else {
                    tracing::debug!(peer_id = %from, "Ignoring unversioned configuration");
                    return;
                };
                let outcome = self.apply_remote(&from, message.payload, version).await;
                tracing::debug!(peer_id = %from, outcome = ?outcome, "Processed remote configuration");
            }
        }
    }

    fn register_sender(&self, message: &SyncMessage) {
        let id = message.instance_id.as_str();
        if !self.peers.contains(id) {
            let Some(endpoint) = message.payload.get("endpoint").and_then(Value::as_str) else {
                return;
            };
            match self.add_peer(id, endpoint) {
                Ok(_) => tracing::info!(peer_id = %id, "Discovered peer"),
                Err(e) => {
                    tracing::debug!(peer_id = %id, error = %e, "Ignoring peer announcement");
                    return;
                }
            }
        }
        self.peers.touch(id, message.version.clone());
    }

    fn beacon(&self, kind: SyncMessageKind) -> SyncMessage {
        SyncMessage::new(kind, &self.instance_id, json!({ "endpoint": self.settings.endpoint }))
            .with_version(self.local_version())
    }

    async fn sync_round(&self) {
        if let Err(e) = self.publish(self.beacon(SyncMessageKind::Heartbeat)).await {
            tracing::warn!(error = %e, "Heartbeat failed");
        }
        let timeout = chrono::Duration::milliseconds(
            i64::try_from(self.settings.peer_timeout_ms).unwrap_or(i64::MAX / 2),
        );
        self.peers.expire_stale(timeout);
        let report = self.perform_sync().await;
        tracing::debug!(
            attempted = report.attempted,
            online = report.online,
            offline = report.offline,
            "Sync round complete"
        );
    }

    async fn publish(&self, message: SyncMessage) -> CoreResult<()> {
        metrics::record_sync_message("out", message.kind.as_str());
        self.transport.publish(&self.settings.channel, message).await
    }
}

/// Pushes locally originated commits to peers.
pub struct SyncWatcher {
    coordinator: Weak<SyncCoordinator>,
}

impl SyncWatcher {
    pub fn new(coordinator: Weak<SyncCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl ConfigWatcher for SyncWatcher {
    async fn on_change(&self, event: &ConfigChangeEvent) -> Result<(), WatcherError> {
        if event.source.starts_with(SYNC_SOURCE_PREFIX) {
            return Ok(());
        }
        let Some(coordinator) = self.coordinator.upgrade() else {
            return Ok(());
        };
        coordinator
            .push_configuration(Some(event.new_value.clone()))
            .await?;
        Ok(())
    }
}
