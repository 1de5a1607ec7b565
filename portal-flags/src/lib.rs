//! # portal-flags
//!
//! Persisted feature flags on top of a keyed, observable value store.
//!
//! - [`store::KeyedObservableStore`]: per-key reads, serialized per-key writes,
//!   replay-current-then-push observation
//! - [`transport`]: storage transports (in-memory, JSON file)
//! - [`registry::FlagRegistry`]: first-registrant-wins flag declarations
//! - [`api::PersistedFeatureFlags`]: the flag API used by hosts

pub mod api;
pub mod error;
pub mod registry;
pub mod reporter;
pub mod store;
pub mod transport;

pub use api::{PersistedFeatureFlags, FLAGS_BUCKET};
pub use error::StorageError;
pub use registry::{FlagConflict, FlagRegistry};
pub use reporter::{Diagnostic, ErrorReporter, RecordingReporter, TracingReporter};
pub use store::{KeyedObservableStore, Observation};
pub use transport::{storage_dir_at, JsonFileTransport, MemoryTransport, StorageTransport};
