//! Cache subsystem.
//!
//! # Data Flow
//! ```text
//! collaborator lookup
//!     → layer.rs (TTL check → LRU touch → hit/miss statistics)
//!
//! committed configuration change
//!     → invalidation.rs (diff paths → drop related keys)
//! ```

pub mod invalidation;
pub mod layer;

pub use invalidation::PathInvalidator;
pub use layer::{CacheEntry, CacheLayer, CacheState, CacheStatistics};
