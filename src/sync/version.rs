//! Configuration versions and content checksums.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 over the canonical JSON rendering of `value`, hex encoded.
///
/// Object keys serialize in sorted order, so two structurally equal values
/// always hash the same regardless of how they were built.
pub fn checksum(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Version stamp of one instance's configuration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationVersion {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub instance_id: String,
    pub checksum: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ConfigurationVersion {
    /// Version zero of `config` on `instance_id`.
    pub fn initial(instance_id: impl Into<String>, config: &Value) -> Self {
        Self {
            version: 0,
            timestamp: Utc::now(),
            instance_id: instance_id.into(),
            checksum: checksum(config),
            metadata: Map::new(),
        }
    }

    /// The successor of this version for `config`.
    pub fn next(&self, config: &Value) -> Self {
        Self {
            version: self.version + 1,
            timestamp: Utc::now(),
            instance_id: self.instance_id.clone(),
            checksum: checksum(config),
            metadata: Map::new(),
        }
    }

    /// Lexicographic order on `(version, timestamp)`.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then(self.timestamp.cmp(&other.timestamp))
    }

    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_checksum_ignores_key_order() {
        let mut a = Map::new();
        a.insert("b".into(), json!(1));
        a.insert("a".into(), json!(2));
        let b = json!({"a": 2, "b": 1});
        assert_eq!(checksum(&Value::Object(a)), checksum(&b));
        assert_ne!(checksum(&b), checksum(&json!({"a": 2, "b": 2})));
        assert_eq!(checksum(&b).len(), 64);
    }

    #[test]
    fn test_next_strictly_increases() {
        let v0 = ConfigurationVersion::initial("i1", &json!({}));
        let v1 = v0.next(&json!({"a": 1}));
        assert_eq!(v1.version, 1);
        assert_eq!(v1.instance_id, "i1");
        assert!(v1.is_newer_than(&v0));
    }

    #[test]
    fn test_compare_uses_timestamp_on_version_tie() {
        let now = Utc::now();
        let mut older = ConfigurationVersion::initial("a", &json!({}));
        older.version = 3;
        older.timestamp = now;
        let mut newer = older.clone();
        newer.timestamp = now + Duration::seconds(1);

        assert_eq!(newer.compare(&older), Ordering::Greater);
        let mut higher = older.clone();
        higher.version = 4;
        higher.timestamp = now - Duration::seconds(60);
        assert_eq!(higher.compare(&newer), Ordering::Greater);
    }
}
