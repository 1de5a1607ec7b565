//! Flag registry: first registrant wins, later ones become conflicts.
//!
//! Registration is a pure function returning the next registry plus the
//! conflict (if any), so the outcome is testable without any reporter wired
//! in. Insertion order is preserved for listings.

use indexmap::IndexMap;

use portal_core::types::{FeatureFlag, FlagName, PluginId};

/// Second registration of an existing name by a different owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagConflict {
    pub name: FlagName,
    /// Owner whose definition stays authoritative.
    pub registered_by: PluginId,
    /// Owner whose definition was ignored.
    pub rejected_from: PluginId,
}

/// Insertion-ordered map from flag name to its first-registered definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagRegistry {
    flags: IndexMap<FlagName, FeatureFlag>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `flag`, returning the resulting registry and any conflict.
    ///
    /// The same owner registering a name twice is a no-op, not a conflict.
    #[must_use]
    pub fn register(mut self, flag: FeatureFlag) -> (Self, Option<FlagConflict>) {
        let conflict = self.insert(flag);
        (self, conflict)
    }

    /// In-place form of [`FlagRegistry::register`].
    pub fn insert(&mut self, flag: FeatureFlag) -> Option<FlagConflict> {
        if let Some(existing) = self.flags.get(&flag.name) {
            if existing.plugin_id == flag.plugin_id {
                return None;
            }
            return Some(FlagConflict {
                name: flag.name,
                registered_by: existing.plugin_id.clone(),
                rejected_from: flag.plugin_id,
            });
        }
        self.flags.insert(flag.name.clone(), flag);
        None
    }

    /// Build a registry from declarations in order, collecting every conflict.
    pub fn from_flags(flags: impl IntoIterator<Item = FeatureFlag>) -> (Self, Vec<FlagConflict>) {
        let mut registry = Self::new();
        let mut conflicts = Vec::new();
        for flag in flags {
            if let Some(conflict) = registry.insert(flag) {
                conflicts.push(conflict);
            }
        }
        (registry, conflicts)
    }

    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn flags(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.flags.values()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registrant_wins() {
        let (registry, first) = FlagRegistry::new().register(FeatureFlag::persisted("x", "a"));
        assert!(first.is_none());

        let (registry, second) = registry.register(
            FeatureFlag::session("x", "b").with_description("shadowed"),
        );
        let conflict = second.expect("conflict");
        assert_eq!(conflict.registered_by, PluginId::from("a"));
        assert_eq!(conflict.rejected_from, PluginId::from("b"));

        let kept = registry.get("x").expect("flag");
        assert_eq!(kept.plugin_id, PluginId::from("a"));
        assert!(kept.is_persisted());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_owner_reregistration_is_silent() {
        let (registry, _) = FlagRegistry::new().register(FeatureFlag::persisted("x", "a"));
        let (registry, conflict) = registry.register(FeatureFlag::persisted("x", "a"));
        assert!(conflict.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn listing_preserves_insertion_order() {
        let (registry, conflicts) = FlagRegistry::from_flags([
            FeatureFlag::persisted("zeta", "a"),
            FeatureFlag::persisted("alpha", "a"),
            FeatureFlag::persisted("zeta", "b"),
            FeatureFlag::persisted("mid", "c"),
        ]);
        let names: Vec<_> = registry.flags().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(conflicts.len(), 1);
    }
}
