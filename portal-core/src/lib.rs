//! Portal core library: domain types, configuration persistence, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, reconciliation records, feature flags, snapshots
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save / init of `~/.portal/config.yaml`

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AuthConfig, EmptyFetchPolicy, FlagDecl, PortalConfig, ProviderConfig, ScheduleConfig, Secret,
    SourceConfig,
};
pub use error::ConfigError;
pub use types::{
    DerivedEntity, EntityKey, EntityMutation, FeatureFlag, FlagName, FlagPersistence, LocationKey,
    PluginId, Presence, ProviderId, RemoteRecord, StorageValueSnapshot,
};
