//! Bounded snapshot history used for rollback.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable point-in-time copy of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub config: Value,
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConfigurationSnapshot {
    pub fn new(
        id: impl Into<String>,
        config: Value,
        source: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            config,
            source: source.into(),
            metadata,
        }
    }
}

/// Time-ordered snapshot history with FIFO eviction.
#[derive(Debug)]
pub struct SnapshotRegistry {
    max_snapshots: usize,
    entries: VecDeque<ConfigurationSnapshot>,
}

impl SnapshotRegistry {
    /// Create a registry holding at most `max_snapshots` entries (minimum 1).
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            max_snapshots: max_snapshots.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Store a snapshot, returning any snapshots evicted to stay within bounds.
    ///
    /// Re-using an id replaces the older snapshot and moves it to the newest position.
    pub fn insert(&mut self, snapshot: ConfigurationSnapshot) -> Vec<ConfigurationSnapshot> {
        self.entries.retain(|s| s.id != snapshot.id);
        self.entries.push_back(snapshot);

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_snapshots {
            if let Some(oldest) = self.entries.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&ConfigurationSnapshot> {
        self.entries.iter().find(|s| s.id == id)
    }

    /// The most recently stored snapshot.
    pub fn latest(&self) -> Option<&ConfigurationSnapshot> {
        self.entries.back()
    }

    pub fn remove(&mut self, id: &str) -> Option<ConfigurationSnapshot> {
        let index = self.entries.iter().position(|s| s.id == id)?;
        self.entries.remove(index)
    }

    /// Snapshots oldest first.
    pub fn list(&self) -> Vec<ConfigurationSnapshot> {
        self.entries.iter().cloned().collect()
    }

    /// Replace the whole history, keeping only the newest `max_snapshots`.
    pub fn replace_all(&mut self, snapshots: Vec<ConfigurationSnapshot>) {
        self.entries.clear();
        for snapshot in snapshots {
            self.insert(snapshot);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(id: &str, n: i64) -> ConfigurationSnapshot {
        ConfigurationSnapshot::new(id, json!({ "n": n }), "test", Map::new())
    }

    #[test]
    fn test_bound_holds_after_every_insert() {
        let mut registry = SnapshotRegistry::new(3);
        for i in 0..10 {
            registry.insert(snap(&format!("s{i}"), i));
            assert!(registry.len() <= 3);
        }
        let ids: Vec<_> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["s7", "s8", "s9"]);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut registry = SnapshotRegistry::new(2);
        assert!(registry.insert(snap("a", 1)).is_empty());
        assert!(registry.insert(snap("b", 2)).is_empty());
        let evicted = registry.insert(snap("c", 3));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "a");
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_reused_id_replaces() {
        let mut registry = SnapshotRegistry::new(5);
        registry.insert(snap("a", 1));
        registry.insert(snap("b", 2));
        registry.insert(snap("a", 3));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.latest().unwrap().config, json!({"n": 3}));
    }

    #[test]
    fn test_remove_and_zero_capacity() {
        let mut registry = SnapshotRegistry::new(0);
        assert_eq!(registry.max_snapshots(), 1);
        registry.insert(snap("a", 1));
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }
}
