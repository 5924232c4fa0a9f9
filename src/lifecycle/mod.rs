//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load settings → Load initial document → Build core → Start background tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Trigger broadcast → Tasks exit → Coordinators stop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Reload every change source
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::ConfigCore;
