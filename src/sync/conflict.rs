//! Conflict detection output and deterministic resolution strategies.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sync::version::ConfigurationVersion;

/// Rule for picking a winner between diverged copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Newer `(version, timestamp)` wins; ties keep the local value.
    #[default]
    LastWriteWins,
    /// Older `(version, timestamp)` wins; ties keep the local value.
    FirstWriteWins,
    /// Shallow object merge, remote keys win; non-objects take the remote value.
    Merge,
    /// Higher integer version wins, timestamps ignored; ties keep the local value.
    VersionBased,
    /// Left unresolved for an external decision.
    Manual,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last-write-wins",
            ConflictStrategy::FirstWriteWins => "first-write-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::VersionBased => "version-based",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(ConflictStrategy::LastWriteWins),
            "first-write-wins" => Ok(ConflictStrategy::FirstWriteWins),
            "merge" => Ok(ConflictStrategy::Merge),
            "version-based" => Ok(ConflictStrategy::VersionBased),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

/// Which side a resolution settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Pending,
    Local,
    Remote,
    Merged,
    Manual,
}

/// Two diverged copies of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationConflict {
    /// Dotted path of the conflicting subtree; `$` is the whole document.
    pub path: String,
    pub local_value: Value,
    pub remote_value: Value,
    pub local_version: ConfigurationVersion,
    pub remote_version: ConfigurationVersion,
    pub resolution: Resolution,
    pub resolved_value: Option<Value>,
}

/// Path used for whole-document conflicts.
pub const ROOT_PATH: &str = "$";

impl ConfigurationConflict {
    pub fn new(
        local_value: Value,
        remote_value: Value,
        local_version: ConfigurationVersion,
        remote_version: ConfigurationVersion,
    ) -> Self {
        Self {
            path: ROOT_PATH.to_string(),
            local_value,
            remote_value,
            local_version,
            remote_version,
            resolution: Resolution::Pending,
            resolved_value: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_value.is_some()
    }
}

/// Apply `strategy` to `conflict`. Same inputs always give the same result.
pub fn resolve(mut conflict: ConfigurationConflict, strategy: ConflictStrategy) -> ConfigurationConflict {
    let remote_order = conflict.remote_version.compare(&conflict.local_version);
    let resolution = match strategy {
        ConflictStrategy::LastWriteWins => pick(remote_order == Ordering::Greater),
        ConflictStrategy::FirstWriteWins => pick(remote_order == Ordering::Less),
        ConflictStrategy::VersionBased => {
            pick(conflict.remote_version.version > conflict.local_version.version)
        }
        ConflictStrategy::Merge => match (&conflict.local_value, &conflict.remote_value) {
            (Value::Object(_), Value::Object(_)) => Resolution::Merged,
            _ => Resolution::Remote,
        },
        ConflictStrategy::Manual => Resolution::Manual,
    };

    conflict.resolved_value = match resolution {
        Resolution::Local => Some(conflict.local_value.clone()),
        Resolution::Remote => Some(conflict.remote_value.clone()),
        Resolution::Merged => Some(shallow_merge(&conflict.local_value, &conflict.remote_value)),
        Resolution::Pending | Resolution::Manual => None,
    };
    conflict.resolution = resolution;
    conflict
}

fn pick(remote_wins: bool) -> Resolution {
    if remote_wins {
        Resolution::Remote
    } else {
        Resolution::Local
    }
}

fn shallow_merge(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let mut merged = l.clone();
            for (key, value) in r {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => remote.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn version(version: u64, checksum: &str, offset_secs: i64) -> ConfigurationVersion {
        ConfigurationVersion {
            version,
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            instance_id: "i".into(),
            checksum: checksum.into(),
            metadata: Default::default(),
        }
    }

    fn conflict(local: ConfigurationVersion, remote: ConfigurationVersion) -> ConfigurationConflict {
        ConfigurationConflict::new(
            json!({"a": 1, "shared": "local"}),
            json!({"b": 2, "shared": "remote"}),
            local,
            remote,
        )
    }

    #[test]
    fn test_last_write_wins_picks_newer_remote() {
        let c = resolve(conflict(version(1, "a", 0), version(2, "b", 0)), ConflictStrategy::LastWriteWins);
        assert_eq!(c.resolution, Resolution::Remote);
        assert_eq!(c.resolved_value, Some(json!({"b": 2, "shared": "remote"})));
    }

    #[test]
    fn test_last_write_wins_tie_keeps_local() {
        let local = version(2, "a", 0);
        let mut remote = local.clone();
        remote.checksum = "b".into();
        let c = resolve(conflict(local, remote), ConflictStrategy::LastWriteWins);
        assert_eq!(c.resolution, Resolution::Local);
    }

    #[test]
    fn test_first_write_wins_is_inverse() {
        let c = resolve(conflict(version(1, "a", 0), version(2, "b", 0)), ConflictStrategy::FirstWriteWins);
        assert_eq!(c.resolution, Resolution::Local);
        let c = resolve(conflict(version(3, "a", 0), version(2, "b", 0)), ConflictStrategy::FirstWriteWins);
        assert_eq!(c.resolution, Resolution::Remote);
    }

    #[test]
    fn test_version_based_ignores_timestamp() {
        // Remote has the lower version but a later timestamp.
        let c = resolve(conflict(version(5, "a", 0), version(4, "b", 60)), ConflictStrategy::VersionBased);
        assert_eq!(c.resolution, Resolution::Local);
        let c = resolve(conflict(version(5, "a", 60), version(6, "b", 0)), ConflictStrategy::VersionBased);
        assert_eq!(c.resolution, Resolution::Remote);
    }

    #[test]
    fn test_merge_remote_keys_win() {
        let c = resolve(conflict(version(1, "a", 0), version(1, "b", 0)), ConflictStrategy::Merge);
        assert_eq!(c.resolution, Resolution::Merged);
        assert_eq!(
            c.resolved_value,
            Some(json!({"a": 1, "b": 2, "shared": "remote"}))
        );

        let scalar = ConfigurationConflict::new(json!({"a": 1}), json!(7), version(1, "a", 0), version(1, "b", 0));
        let c = resolve(scalar, ConflictStrategy::Merge);
        assert_eq!(c.resolution, Resolution::Remote);
        assert_eq!(c.resolved_value, Some(json!(7)));
    }

    #[test]
    fn test_manual_is_unresolved() {
        let c = resolve(conflict(version(1, "a", 0), version(2, "b", 0)), ConflictStrategy::Manual);
        assert_eq!(c.resolution, Resolution::Manual);
        assert!(!c.is_resolved());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("merge".parse::<ConflictStrategy>(), Ok(ConflictStrategy::Merge));
        assert!("nope".parse::<ConflictStrategy>().is_err());
        let parsed: ConflictStrategy = serde_json::from_str("\"first-write-wins\"").unwrap();
        assert_eq!(parsed, ConflictStrategy::FirstWriteWins);
    }
}
