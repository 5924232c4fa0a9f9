//! Drops cached values whose source paths changed.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::diff::diff;
use crate::cache::layer::CacheLayer;
use crate::runtime::manager::{ConfigChangeEvent, ConfigWatcher, WatcherError};

/// Watcher that invalidates cache keys named after configuration paths.
///
/// A key is dropped when it equals a changed path, lies below it, or is one
/// of its ancestors (a cached `server` object is stale once `server.port`
/// moves). A change at the root clears everything.
pub struct PathInvalidator {
    cache: Arc<CacheLayer>,
}

impl PathInvalidator {
    pub fn new(cache: Arc<CacheLayer>) -> Self {
        Self { cache }
    }
}

fn related(key: &str, path: &str) -> bool {
    let nested = |longer: &str, shorter: &str| {
        longer.len() > shorter.len()
            && longer.starts_with(shorter)
            && longer.as_bytes()[shorter.len()] == b'.'
    };
    key == path || nested(key, path) || nested(path, key)
}

#[async_trait]
impl ConfigWatcher for PathInvalidator {
    async fn on_change(&self, event: &ConfigChangeEvent) -> Result<(), WatcherError> {
        let changed: Vec<String> = diff(&event.old_value, &event.new_value)
            .into_iter()
            .map(|d| d.path)
            .collect();
        if changed.iter().any(String::is_empty) {
            self.cache.clear();
            return Ok(());
        }

        let removed = self
            .cache
            .invalidate_where(|key| changed.iter().any(|path| related(key, path)));
        if removed > 0 {
            tracing::debug!(removed, source = %event.source, "Invalidated cached values");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CacheSettings;
    use chrono::Utc;
    use serde_json::{json, Map};

    #[test]
    fn test_related_paths() {
        assert!(related("server.port", "server.port"));
        assert!(related("server", "server.port"));
        assert!(related("server.port.raw", "server.port"));
        assert!(!related("server.portal", "server.port"));
        assert!(!related("db", "server.port"));
    }

    #[tokio::test]
    async fn test_invalidates_changed_paths_only() {
        let cache = Arc::new(CacheLayer::new(CacheSettings::default()));
        cache.set("server", json!({}), None);
        cache.set("server.port", json!(80), None);
        cache.set("db.host", json!("h"), None);

        let watcher = PathInvalidator::new(cache.clone());
        let event = ConfigChangeEvent {
            old_value: json!({"server": {"port": 80}, "db": {"host": "h"}}),
            new_value: json!({"server": {"port": 81}, "db": {"host": "h"}}),
            timestamp: Utc::now(),
            source: "api".into(),
            metadata: Map::new(),
        };
        watcher.on_change(&event).await.unwrap();

        assert!(!cache.has("server"));
        assert!(!cache.has("server.port"));
        assert!(cache.has("db.host"));
    }
}
