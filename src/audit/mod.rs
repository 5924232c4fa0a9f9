//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! committed change (ConfigChangeEvent)
//!     → AuditWatcher (action + actor from event)
//!     → diff.rs (structural diff old → new)
//!     → trail.rs (append, query, export, retention)
//!     → store.rs (optional JSON file mirror + archive)
//! ```

pub mod diff;
pub mod store;
pub mod trail;

pub use diff::{apply_diff, diff, generate_diff_summary, DiffEntry, DiffKind};
pub use store::{JsonFileStore, MemoryStore, PersistentStore};
pub use trail::{
    AuditAction, AuditEntry, AuditFilter, AuditStatistics, AuditTrail, AuditUser, AuditWatcher,
    ExportFormat, LogOptions, RetentionReport,
};
