//! Hot reload subsystem.
//!
//! # Data Flow
//! ```text
//! file write / remote poll
//!     → source.rs (ChangeSignal per key)
//!     → coordinator.rs (debounce, validate, apply, notify listeners)
//!     → RuntimeConfigurationManager
//! ```

pub mod coordinator;
pub mod source;

pub use coordinator::{
    HotReloadCoordinator, HotReloadEvent, HotReloadListener, HotReloadStatus, HOT_RELOAD_SOURCE_PREFIX,
};
pub use source::{
    load_document, parse_document, ChangeSignal, ChangeSource, FileChangeSource, RemoteChangeSource,
    SignalOrigin,
};
