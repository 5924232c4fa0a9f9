//! Error taxonomy shared by every subsystem.
//!
//! # Design Decisions
//! - Validation and not-found conditions are normally reported as data in
//!   result structs; the variants here exist for the places where they do
//!   cross a `Result` boundary (state import, transport, persistence)
//! - `CommitFailure` is the only variant that escapes `update_configuration`

use thiserror::Error;

/// Errors produced by the configuration core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Merged configuration failed schema or semantic checks.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced snapshot, peer, audit entry or reload source is unknown.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Persistence or remote fetch failed; in-memory state stays authoritative.
    #[error("transient I/O failure during {operation}: {message}")]
    TransientIo { operation: String, message: String },

    /// A conflict needs an external decision.
    #[error("conflict at {path} requires manual resolution")]
    ConflictUnresolved { path: String },

    /// Commit after lock acquisition failed.
    #[error("commit failed: {0}")]
    CommitFailure(String),

    /// A dotted path could not be turned into an update.
    #[error("invalid configuration path: {0:?}")]
    InvalidPath(String),

    /// A configuration document could not be parsed.
    #[error("parse error in {origin}: {message}")]
    Parse { origin: String, message: String },

    /// Peer status graph violation.
    #[error("peer {peer} cannot move from {from} to {to}")]
    InvalidTransition {
        peer: String,
        from: &'static str,
        to: &'static str,
    },

    /// Peer registration with an unusable endpoint.
    #[error("invalid peer endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    /// Pub/sub publish or subscribe failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn transient(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::TransientIo {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// True for failures that callers should log and move past.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::Transport(_))
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
