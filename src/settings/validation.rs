//! Settings validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, intervals > 0)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoreSettings → Result<(), Vec<SettingsIssue>>
//! - Runs before settings are accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::settings::schema::CoreSettings;

/// A single settings problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for SettingsIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate settings, returning every issue found.
pub fn validate_settings(settings: &CoreSettings) -> Result<(), Vec<SettingsIssue>> {
    let mut issues = Vec::new();
    let mut check = |ok: bool, field: &str, message: &str| {
        if !ok {
            issues.push(SettingsIssue {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
    };

    check(!settings.instance_id.trim().is_empty(), "instance_id", "must not be empty");
    check(settings.manager.max_snapshots > 0, "manager.max_snapshots", "must be greater than 0");
    check(settings.manager.max_config_bytes > 0, "manager.max_config_bytes", "must be greater than 0");
    check(settings.manager.event_buffer > 0, "manager.event_buffer", "must be greater than 0");
    check(settings.cache.max_size > 0, "cache.max_size", "must be greater than 0");
    check(settings.cache.default_ttl_ms > 0, "cache.default_ttl_ms", "must be greater than 0");
    check(settings.cache.size_factor > 0, "cache.size_factor", "must be greater than 0");
    check(settings.hot_reload.debounce_ms > 0, "hot_reload.debounce_ms", "must be greater than 0");
    check(settings.hot_reload.poll_interval_ms > 0, "hot_reload.poll_interval_ms", "must be greater than 0");
    check(settings.sync.sync_interval_ms > 0, "sync.sync_interval_ms", "must be greater than 0");
    check(
        settings.sync.peer_timeout_ms >= settings.sync.sync_interval_ms,
        "sync.peer_timeout_ms",
        "must be at least sync.sync_interval_ms",
    );
    check(!settings.sync.channel.is_empty(), "sync.channel", "must not be empty");
    check(settings.audit.max_entries > 0, "audit.max_entries", "must be greater than 0");
    check(
        !settings.audit.archive || settings.audit.archive_path.is_some(),
        "audit.archive_path",
        "required when audit.archive is enabled",
    );
    check(
        matches!(settings.observability.log_format.as_str(), "pretty" | "json"),
        "observability.log_format",
        "must be \"pretty\" or \"json\"",
    );

    if settings.admin.enabled {
        check(
            settings.admin.bind_address.parse::<SocketAddr>().is_ok(),
            "admin.bind_address",
            "must be a socket address",
        );
        check(!settings.admin.api_key.is_empty(), "admin.api_key", "must not be empty");
    }
    if settings.observability.metrics_enabled {
        check(
            settings.observability.metrics_address.parse::<SocketAddr>().is_ok(),
            "observability.metrics_address",
            "must be a socket address",
        );
    }

    for (i, remote) in settings.hot_reload.remote_sources.iter().enumerate() {
        check(
            Url::parse(&remote.url).is_ok(),
            &format!("hot_reload.remote_sources[{i}].url"),
            "must be a valid URL",
        );
    }
    for (i, peer) in settings.sync.peers.iter().enumerate() {
        check(
            Url::parse(&peer.endpoint).is_ok(),
            &format!("sync.peers[{i}].endpoint"),
            "must be a valid URL",
        );
        check(
            peer.id != settings.instance_id,
            &format!("sync.peers[{i}].id"),
            "must differ from instance_id",
        );
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::schema::{PeerSettings, RemoteSourceSettings};

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_settings(&CoreSettings::default()).is_ok());
    }

    #[test]
    fn test_bad_urls_and_addresses() {
        let mut settings = CoreSettings::default();
        settings.instance_id = "node-a".into();
        settings.admin.enabled = true;
        settings.admin.bind_address = "not-an-address".into();
        settings.hot_reload.remote_sources.push(RemoteSourceSettings {
            name: "remote".into(),
            url: "::nope".into(),
        });
        settings.sync.peers.push(PeerSettings {
            id: "node-a".into(),
            endpoint: "inproc://node-a".into(),
        });

        let issues = validate_settings(&settings).unwrap_err();
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"admin.bind_address"));
        assert!(fields.contains(&"hot_reload.remote_sources[0].url"));
        assert!(fields.contains(&"sync.peers[0].id"));
    }

    #[test]
    fn test_archive_requires_path() {
        let mut settings = CoreSettings::default();
        settings.audit.archive = true;
        let issues = validate_settings(&settings).unwrap_err();
        assert_eq!(issues[0].field, "audit.archive_path");
    }
}
