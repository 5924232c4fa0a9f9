//! Resilience helpers.
//!
//! # Design Decisions
//! - Remote change sources back off exponentially with jitter after failed
//!   polls instead of hammering an unavailable endpoint

pub mod backoff;

pub use backoff::calculate_backoff;
