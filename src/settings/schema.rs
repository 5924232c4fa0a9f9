//! Settings schema definitions.
//!
//! This module defines the complete settings structure for the core itself
//! (not the live configuration it manages). All types derive Serde traits
//! for deserialization from a TOML file.

use serde::{Deserialize, Serialize};

use crate::sync::ConflictStrategy;

/// Root settings for the configuration core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreSettings {
    /// Identifier of this instance in sync messages and versions.
    pub instance_id: String,

    /// Path to the initial configuration document (TOML or JSON).
    pub config_path: Option<String>,

    /// Runtime manager settings (snapshots, commit limits, validation).
    pub manager: ManagerSettings,

    /// Derived-value cache settings.
    pub cache: CacheSettings,

    /// Hot reload settings.
    pub hot_reload: HotReloadSettings,

    /// Multi-instance sync settings.
    pub sync: SyncSettings,

    /// Audit trail settings.
    pub audit: AuditSettings,

    /// Admin API settings.
    pub admin: AdminSettings,

    /// Observability settings.
    pub observability: ObservabilitySettings,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            instance_id: format!("instance-{}", uuid::Uuid::new_v4().simple()),
            config_path: None,
            manager: ManagerSettings::default(),
            cache: CacheSettings::default(),
            hot_reload: HotReloadSettings::default(),
            sync: SyncSettings::default(),
            audit: AuditSettings::default(),
            admin: AdminSettings::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

/// Runtime manager settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Maximum snapshots retained for rollback (oldest evicted first).
    pub max_snapshots: usize,

    /// Largest serialized configuration accepted at commit time.
    pub max_config_bytes: usize,

    /// Paths the built-in validator requires to be present.
    pub required_paths: Vec<String>,

    /// Paths that produce a validation warning when present.
    pub deprecated_paths: Vec<String>,

    /// Capacity of the change-event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_snapshots: 50,
            max_config_bytes: 1024 * 1024,
            required_paths: Vec::new(),
            deprecated_paths: Vec::new(),
            event_buffer: 64,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,

    /// TTL applied when `set` is called without one.
    pub default_ttl_ms: u64,

    /// Multiplier applied to serialized length when estimating entry size.
    pub size_factor: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_ms: 5 * 60 * 1000,
            size_factor: 2,
        }
    }
}

/// Hot reload settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HotReloadSettings {
    /// Enable hot reload.
    pub enabled: bool,

    /// Quiet period per signal key before a reload fires.
    pub debounce_ms: u64,

    /// Validate the merged candidate before forwarding it.
    pub validate: bool,

    /// Discard candidates that fail validation instead of forwarding them.
    pub rollback_on_error: bool,

    /// Files to watch for changes.
    pub watch_paths: Vec<String>,

    /// Remote documents to poll.
    pub remote_sources: Vec<RemoteSourceSettings>,

    /// Remote polling interval.
    pub poll_interval_ms: u64,
}

impl Default for HotReloadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            validate: true,
            rollback_on_error: true,
            watch_paths: Vec::new(),
            remote_sources: Vec::new(),
            poll_interval_ms: 30_000,
        }
    }
}

/// A remote configuration document polled over HTTP.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteSourceSettings {
    /// Name used as the debounce key.
    pub name: String,

    /// URL returning a JSON document.
    pub url: String,
}

/// Multi-instance sync settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Enable sync with peers.
    pub enabled: bool,

    /// Endpoint advertised to peers in discovery messages.
    pub endpoint: String,

    /// Pub/sub channel name.
    pub channel: String,

    /// Default conflict resolution strategy.
    pub strategy: ConflictStrategy,

    /// Heartbeat and stale-peer sweep interval.
    pub sync_interval_ms: u64,

    /// Peers not heard from within this window are marked offline.
    pub peer_timeout_ms: u64,

    /// How long `perform_sync` waits for responses.
    pub response_timeout_ms: u64,

    /// Push every local commit to peers.
    pub auto_push: bool,

    /// Statically known peers.
    pub peers: Vec<PeerSettings>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "inproc://local".to_string(),
            channel: "live-config".to_string(),
            strategy: ConflictStrategy::LastWriteWins,
            sync_interval_ms: 30_000,
            peer_timeout_ms: 90_000,
            response_timeout_ms: 2_000,
            auto_push: true,
            peers: Vec::new(),
        }
    }
}

/// A statically configured peer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerSettings {
    pub id: String,
    pub endpoint: String,
}

/// Audit trail settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Record every committed change.
    pub enabled: bool,

    /// Maximum retained entries.
    pub max_entries: usize,

    /// Entries older than this are removed by retention enforcement.
    pub max_age_secs: u64,

    /// Archive expired entries before deleting them.
    pub archive: bool,

    /// JSON file holding the live audit log.
    pub store_path: Option<String>,

    /// JSON file receiving archived entries.
    pub archive_path: Option<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_age_secs: 30 * 24 * 60 * 60,
            archive: false,
            store_path: None,
            archive_path: None,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
