//! Structural diff between two configuration values.
//!
//! Objects are compared key-wise over the union of their keys; anything else
//! (scalars, arrays, null) is compared as a whole. Each leaf difference yields
//! one [`DiffEntry`] addressed by a dotted path, with the empty path standing
//! for the root.
//!
//! Keys that themselves contain `.` produce ambiguous paths; [`apply_diff`]
//! cannot replay those.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;
use crate::runtime::merge::{remove_path, set_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiffKind::Added => "added",
            DiffKind::Removed => "removed",
            DiffKind::Modified => "modified",
        })
    }
}

/// One leaf-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub new_value: Option<Value>,
}

/// A field that is present is `Some`, even when it holds JSON `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Compute the differences turning `old` into `new`.
pub fn diff(old: &Value, new: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_at("", Some(old), Some(new), &mut out);
    out
}

fn diff_at(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<DiffEntry>) {
    match (old, new) {
        (None, None) => {}
        (None, Some(added)) => out.push(DiffEntry {
            path: path.to_string(),
            kind: DiffKind::Added,
            old_value: None,
            new_value: Some(added.clone()),
        }),
        (Some(removed), None) => out.push(DiffEntry {
            path: path.to_string(),
            kind: DiffKind::Removed,
            old_value: Some(removed.clone()),
            new_value: None,
        }),
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                diff_at(&child, a.get(key), b.get(key), out);
            }
        }
        (Some(a), Some(b)) => {
            if a != b {
                out.push(DiffEntry {
                    path: path.to_string(),
                    kind: DiffKind::Modified,
                    old_value: Some(a.clone()),
                    new_value: Some(b.clone()),
                });
            }
        }
    }
}

/// Replay `diffs` on top of `base`.
///
/// `apply_diff(a, &diff(a, b)) == b` for any `b` whose keys contain no `.`.
pub fn apply_diff(base: &Value, diffs: &[DiffEntry]) -> CoreResult<Value> {
    let mut target = base.clone();
    for entry in diffs {
        match entry.kind {
            DiffKind::Removed => {
                remove_path(&mut target, &entry.path);
            }
            DiffKind::Added | DiffKind::Modified => {
                let value = entry.new_value.clone().unwrap_or(Value::Null);
                set_path(&mut target, &entry.path, value)?;
            }
        }
    }
    Ok(target)
}

/// One-line rendering such as `2 added, 1 modified, 0 removed: a.b, c, d`.
pub fn generate_diff_summary(diffs: &[DiffEntry]) -> String {
    const MAX_LISTED: usize = 10;

    if diffs.is_empty() {
        return "no changes".to_string();
    }
    let count = |kind: DiffKind| diffs.iter().filter(|d| d.kind == kind).count();
    let paths: Vec<&str> = diffs
        .iter()
        .take(MAX_LISTED)
        .map(|d| if d.path.is_empty() { "<root>" } else { d.path.as_str() })
        .collect();
    let more = diffs.len().saturating_sub(MAX_LISTED);
    let suffix = if more > 0 {
        format!(" and {more} more")
    } else {
        String::new()
    };

    format!(
        "{} added, {} modified, {} removed: {}{}",
        count(DiffKind::Added),
        count(DiffKind::Modified),
        count(DiffKind::Removed),
        paths.join(", "),
        suffix
    )
}
