//! Settings for the configuration core itself.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CoreSettings (validated, immutable)
//!     → sections handed to each subsystem at construction
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; the live configuration the core
//!   manages is a separate value owned by the runtime manager
//! - All fields have defaults to allow minimal settings files
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_settings, parse_settings, SettingsError};
pub use schema::{
    AdminSettings, AuditSettings, CacheSettings, CoreSettings, HotReloadSettings, ManagerSettings,
    ObservabilitySettings, PeerSettings, RemoteSourceSettings, SyncSettings,
};
