//! Multi-instance synchronization subsystem.
//!
//! # Data Flow
//! ```text
//! local commit ──▶ SyncWatcher ──▶ push_configuration ──▶ transport (ConfigUpdate)
//!
//! transport ──▶ coordinator.rs (filter, peer bookkeeping)
//!           ──▶ checksum compare (version.rs)
//!           ──▶ conflict.rs (strategy)
//!           ──▶ RuntimeConfigurationManager (source "sync:<peer>")
//! ```
//!
//! # Design Decisions
//! - No network protocol is baked in; `PubSubTransport` is the seam and
//!   `InProcessBus` the shipped adapter
//! - Conflicts are whole-document: the checksum covers the full value

pub mod conflict;
pub mod coordinator;
pub mod peer;
pub mod transport;
pub mod version;

pub use conflict::{resolve, ConfigurationConflict, ConflictStrategy, Resolution};
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncReport, SyncStatus, SyncWatcher};
pub use peer::{Peer, PeerRegistry, PeerStatus};
pub use transport::{InProcessBus, PubSubTransport, Subscription, SyncMessage, SyncMessageKind};
pub use version::{checksum, ConfigurationVersion};
