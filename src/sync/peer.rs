//! Peer registry and the peer status graph.
//!
//! ```text
//!            sync attempt           exchange ok
//!  offline ───────────────▶ syncing ───────────▶ online
//!     ▲                        │                   │
//!     └────── exchange failed ─┘                   │
//!     └──────────────── timed out ─────────────────┘
//! ```
//!
//! An online peer re-enters `syncing` only through a new sync attempt.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::sync::version::ConfigurationVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Offline,
    Syncing,
    Online,
}

impl PeerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerStatus::Offline => "offline",
            PeerStatus::Syncing => "syncing",
            PeerStatus::Online => "online",
        }
    }

    /// Whether the status graph has an edge `self → to`.
    pub fn can_transition(self, to: PeerStatus) -> bool {
        use PeerStatus::*;
        matches!(
            (self, to),
            (Offline, Syncing) | (Syncing, Online) | (Syncing, Offline) | (Online, Offline) | (Online, Syncing)
        )
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: String,
    pub endpoint: String,
    pub version: Option<ConfigurationVersion>,
    pub last_seen: DateTime<Utc>,
    pub status: PeerStatus,
}

/// Concurrent map of known peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer as offline. Re-adding keeps status and version but
    /// updates the endpoint.
    pub fn add(&self, id: &str, endpoint: &str) -> CoreResult<Peer> {
        url::Url::parse(endpoint).map_err(|e| CoreError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        let mut peer = self.peers.entry(id.to_string()).or_insert_with(|| Peer {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            version: None,
            last_seen: Utc::now(),
            status: PeerStatus::Offline,
        });
        peer.endpoint = endpoint.to_string();
        Ok(peer.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Peer> {
        self.peers.remove(id).map(|(_, peer)| peer)
    }

    pub fn get(&self, id: &str) -> Option<Peer> {
        self.peers.get(id).map(|p| p.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// All peers, ordered by id.
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().map(|p| p.value().clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn count(&self, status: PeerStatus) -> usize {
        self.peers.iter().filter(|p| p.status == status).count()
    }

    /// Move a peer along the status graph. Staying in place is a no-op.
    pub fn transition(&self, id: &str, to: PeerStatus) -> CoreResult<PeerStatus> {
        let mut peer = self
            .peers
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("peer", id))?;
        let from = peer.status;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                peer: id.to_string(),
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        peer.status = to;
        tracing::debug!(peer_id = %id, from = %from, to = %to, "Peer status changed");
        Ok(from)
    }

    /// Record contact from a peer, optionally with its latest version.
    pub fn touch(&self, id: &str, version: Option<ConfigurationVersion>) -> bool {
        let Some(mut peer) = self.peers.get_mut(id) else {
            return false;
        };
        peer.last_seen = Utc::now();
        if version.is_some() {
            peer.version = version;
        }
        true
    }

    /// Complete a successful exchange, walking the graph through `syncing`.
    pub fn mark_reachable(&self, id: &str) -> CoreResult<()> {
        let status = self
            .get(id)
            .map(|p| p.status)
            .ok_or_else(|| CoreError::not_found("peer", id))?;
        if status == PeerStatus::Offline {
            self.transition(id, PeerStatus::Syncing)?;
        }
        self.transition(id, PeerStatus::Online)?;
        Ok(())
    }

    /// Mark online peers not heard from within `timeout` as offline.
    pub fn expire_stale(&self, timeout: Duration) -> Vec<String> {
        let Some(cutoff) = Utc::now().checked_sub_signed(timeout) else {
            return Vec::new();
        };
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|p| p.status == PeerStatus::Online && p.last_seen < cutoff)
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            if self.transition(id, PeerStatus::Offline).is_ok() {
                tracing::info!(peer_id = %id, "Peer timed out");
            }
        }
        stale
    }
}
