//! Feature-flag API over two keyed stores.
//!
//! Persisted flags live in the `featureFlags` bucket of the configured
//! transport; session flags live in process memory. Names that were never
//! registered are routed to the persisted store.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use portal_core::types::{FeatureFlag, FlagName, FlagPersistence};

use crate::error::StorageError;
use crate::registry::{FlagConflict, FlagRegistry};
use crate::reporter::{Diagnostic, ErrorReporter};
use crate::store::{KeyedObservableStore, Observation};
use crate::transport::{MemoryTransport, StorageTransport};

/// Storage bucket for persisted flag values.
pub const FLAGS_BUCKET: &str = "featureFlags";

const SESSION_BUCKET: &str = "sessionFlags";

pub struct PersistedFeatureFlags {
    registry: RwLock<FlagRegistry>,
    persisted: KeyedObservableStore<bool>,
    session: KeyedObservableStore<bool>,
    reporter: Arc<dyn ErrorReporter>,
    strict_mode: bool,
}

impl PersistedFeatureFlags {
    pub fn new(
        transport: Arc<dyn StorageTransport>,
        reporter: Arc<dyn ErrorReporter>,
        strict_mode: bool,
    ) -> Self {
        let persisted = KeyedObservableStore::new(FLAGS_BUCKET, transport)
            .with_reporter(reporter.clone())
            .strict(strict_mode)
            .with_known_keys(Vec::<String>::new())
            .with_fallback(false);
        let session = KeyedObservableStore::new(SESSION_BUCKET, Arc::new(MemoryTransport::new()))
            .with_reporter(reporter.clone())
            .strict(strict_mode)
            .with_known_keys(Vec::<String>::new())
            .with_fallback(false);
        Self {
            registry: RwLock::new(FlagRegistry::new()),
            persisted,
            session,
            reporter,
            strict_mode,
        }
    }

    /// Register every flag in order.
    pub fn with_flags(self, flags: impl IntoIterator<Item = FeatureFlag>) -> Self {
        for flag in flags {
            let _ = self.register_flag(flag);
        }
        self
    }

    /// Register a flag. The first registrant of a name stays authoritative.
    pub fn register_flag(&self, flag: FeatureFlag) -> Option<FlagConflict> {
        let name = flag.name.clone();
        let persistence = flag.persistence;
        let conflict = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flag);

        match &conflict {
            Some(conflict) if self.strict_mode => {
                self.reporter.post(Diagnostic::FlagConflict(conflict.clone()));
            }
            Some(conflict) => {
                tracing::debug!(
                    flag = %conflict.name,
                    registered_by = %conflict.registered_by,
                    rejected_from = %conflict.rejected_from,
                    "duplicate flag registration ignored"
                );
            }
            None => match persistence {
                FlagPersistence::Persisted => self.persisted.declare(name.as_str()),
                FlagPersistence::Session => self.session.declare(name.as_str()),
            },
        }
        conflict
    }

    /// Registered flag definitions in registration order.
    pub fn all_flags(&self) -> Vec<FeatureFlag> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .flags()
            .cloned()
            .collect()
    }

    pub fn flag(&self, name: &str) -> Option<FeatureFlag> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Current value; a flag that was never written is inactive.
    pub async fn is_active(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.store_for(name).get(name).await?.unwrap_or(false))
    }

    pub async fn set(&self, name: &str, active: bool) -> Result<(), StorageError> {
        tracing::debug!(flag = name, active, "setting feature flag");
        self.store_for(name).set(name, active).await
    }

    pub async fn observe(&self, name: &str) -> Result<Observation<bool>, StorageError> {
        self.store_for(name).observe(name).await
    }

    /// Write many flags at once.
    ///
    /// With `merge == false`, every registered flag absent from `states` is
    /// reset to inactive.
    pub async fn save(
        &self,
        states: &BTreeMap<FlagName, bool>,
        merge: bool,
    ) -> Result<(), StorageError> {
        for (name, active) in states {
            self.set(name.as_str(), *active).await?;
        }
        if merge {
            return Ok(());
        }
        let unlisted: Vec<FlagName> = self
            .all_flags()
            .into_iter()
            .map(|flag| flag.name)
            .filter(|name| !states.contains_key(name))
            .collect();
        for name in unlisted {
            self.set(name.as_str(), false).await?;
        }
        Ok(())
    }

    fn store_for(&self, name: &str) -> &KeyedObservableStore<bool> {
        let persistence = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|flag| flag.persistence);
        match persistence {
            Some(FlagPersistence::Session) => &self.session,
            _ => &self.persisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;

    fn flags(strict: bool) -> (PersistedFeatureFlags, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let api = PersistedFeatureFlags::new(
            Arc::new(MemoryTransport::new()),
            reporter.clone(),
            strict,
        );
        (api, reporter)
    }

    #[tokio::test]
    async fn registered_flag_never_written_is_inactive() {
        let (api, _) = flags(true);
        api.register_flag(FeatureFlag::persisted("beta-ui", "catalog"));
        assert!(!api.is_active("beta-ui").await.unwrap());
    }

    #[tokio::test]
    async fn session_flags_do_not_touch_persisted_bucket() {
        let transport = Arc::new(MemoryTransport::new());
        let api = PersistedFeatureFlags::new(
            transport.clone(),
            Arc::new(RecordingReporter::new()),
            false,
        );
        api.register_flag(FeatureFlag::session("scratch", "home"));
        api.set("scratch", true).await.unwrap();

        assert!(api.is_active("scratch").await.unwrap());
        assert_eq!(
            transport.get("featureFlags/scratch").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn conflict_is_logged_not_reported_outside_strict_mode() {
        let (api, reporter) = flags(false);
        api.register_flag(FeatureFlag::persisted("x", "a"));
        assert!(api.register_flag(FeatureFlag::persisted("x", "b")).is_some());
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test]
    async fn save_without_merge_resets_unlisted_flags() {
        let (api, _) = flags(false);
        let api = api.with_flags([
            FeatureFlag::persisted("a", "p"),
            FeatureFlag::persisted("b", "p"),
        ]);
        api.set("b", true).await.unwrap();

        let states = BTreeMap::from([(FlagName::from("a"), true)]);
        api.save(&states, false).await.unwrap();
        assert!(api.is_active("a").await.unwrap());
        assert!(!api.is_active("b").await.unwrap());
    }

    #[tokio::test]
    async fn save_with_merge_keeps_unlisted_flags() {
        let (api, _) = flags(false);
        let api = api.with_flags([
            FeatureFlag::persisted("a", "p"),
            FeatureFlag::persisted("b", "p"),
        ]);
        api.set("b", true).await.unwrap();

        let states = BTreeMap::from([(FlagName::from("a"), true)]);
        api.save(&states, true).await.unwrap();
        assert!(api.is_active("b").await.unwrap());
    }
}
