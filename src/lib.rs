//! Live configuration core.
//!
//! Holds a mutable configuration document and lets it change safely at
//! runtime: validated, serialized updates with snapshots and rollback,
//! debounced hot reload from files and remote sources, synchronization
//! between instances, a derived-value cache and an audit trail.
//!
//! ```text
//!   file / remote ──▶ hot_reload ──┐
//!   peers ─────────▶ sync ─────────┼──▶ runtime (lock → validate → snapshot → commit)
//!   admin API ─────────────────────┘            │
//!                                               ├──▶ audit (diff, retention, export)
//!                                               ├──▶ cache (path invalidation)
//!                                               └──▶ sync (auto push)
//! ```

pub mod admin;
pub mod audit;
pub mod cache;
pub mod error;
pub mod hot_reload;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod runtime;
pub mod settings;
pub mod sync;

pub use error::{CoreError, CoreResult};
pub use lifecycle::{ConfigCore, Shutdown};
pub use runtime::RuntimeConfigurationManager;
pub use settings::CoreSettings;
