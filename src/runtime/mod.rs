//! Live configuration value and its mutation pipeline.
//!
//! # Data Flow
//! ```text
//! partial update
//!     → lock.rs (FIFO acquisition)
//!     → merge.rs (deep merge into current)
//!     → validation.rs (gate on merged candidate)
//!     → snapshot.rs (pre-update copy)
//!     → manager.rs (commit + watcher fan-out)
//! ```

pub mod lock;
pub mod manager;
pub mod merge;
pub mod snapshot;
pub mod validation;

pub use lock::{ConfigurationLock, ConfigurationLockGuard};
pub use manager::{
    ConfigChangeEvent, ConfigWatcher, FnWatcher, ManagerState, RuntimeConfigurationManager,
    RuntimeStatistics, UpdateOptions, UpdateResult, WatcherError, WatcherId,
};
pub use merge::deep_merge;
pub use snapshot::{ConfigurationSnapshot, SnapshotRegistry};
pub use validation::{RuleValidator, ValidationIssue, ValidationResult, Validator, ValueKind};
