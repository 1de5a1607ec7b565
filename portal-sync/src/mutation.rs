//! Full-mutation planning shared by every catalog implementation.
//!
//! A full mutation for location key `L` with entity list `E` means:
//! 1. every key in `E` not stored yet is **added**
//! 2. every key in `E` stored under `L` is **updated** when its body hash
//!    differs, otherwise **unchanged**
//! 3. every key in `E` stored under another location key is a **conflict**:
//!    skipped, the other owner's entity untouched
//! 4. every key stored under `L` but absent from `E` is **removed**
//!
//! Entities owned by other location keys are never touched, and applying
//! the same mutation twice yields the same state.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use portal_core::types::{DerivedEntity, EntityKey, EntityMutation, LocationKey};

/// An entity as held by a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub entity: DerivedEntity,
    /// SHA-256 of the canonical JSON payload.
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Complete catalog contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogState {
    #[serde(default)]
    pub entities: BTreeMap<EntityKey, StoredEntity>,
    /// Last refresh request per key.
    #[serde(default)]
    pub refresh_requests: BTreeMap<EntityKey, DateTime<Utc>>,
}

impl CatalogState {
    /// Entities owned by `location_key`, in key order.
    pub fn owned_by<'a>(
        &'a self,
        location_key: &'a LocationKey,
    ) -> impl Iterator<Item = &'a StoredEntity> + 'a {
        self.entities
            .values()
            .filter(move |stored| &stored.entity.location_key == location_key)
    }

    pub fn count_owned_by(&self, location_key: &LocationKey) -> usize {
        self.owned_by(location_key).count()
    }
}

/// Per-key outcome of a full mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum EntityChange {
    Added { key: EntityKey },
    Updated { key: EntityKey },
    Unchanged { key: EntityKey },
    Removed { key: EntityKey },
    Conflict { key: EntityKey, owner: LocationKey },
}

impl EntityChange {
    pub fn key(&self) -> &EntityKey {
        match self {
            EntityChange::Added { key }
            | EntityChange::Updated { key }
            | EntityChange::Unchanged { key }
            | EntityChange::Removed { key }
            | EntityChange::Conflict { key, .. } => key,
        }
    }
}

/// Counts per change kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub conflicts: usize,
}

impl MutationSummary {
    /// Entities owned by the mutating location key after the mutation.
    pub fn owned(&self) -> usize {
        self.added + self.updated + self.unchanged
    }

    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// The planned effect of a full mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub location_key: LocationKey,
    pub changes: Vec<EntityChange>,
}

impl MutationPlan {
    pub fn summary(&self) -> MutationSummary {
        let mut summary = MutationSummary::default();
        for change in &self.changes {
            match change {
                EntityChange::Added { .. } => summary.added += 1,
                EntityChange::Updated { .. } => summary.updated += 1,
                EntityChange::Unchanged { .. } => summary.unchanged += 1,
                EntityChange::Removed { .. } => summary.removed += 1,
                EntityChange::Conflict { .. } => summary.conflicts += 1,
            }
        }
        summary
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &EntityChange> {
        self.changes
            .iter()
            .filter(|change| matches!(change, EntityChange::Conflict { .. }))
    }

    /// Keys now owned by the mutating location key.
    pub fn owned_keys(&self) -> Vec<EntityKey> {
        self.changes
            .iter()
            .filter(|change| {
                matches!(
                    change,
                    EntityChange::Added { .. }
                        | EntityChange::Updated { .. }
                        | EntityChange::Unchanged { .. }
                )
            })
            .map(|change| change.key().clone())
            .collect()
    }
}

/// Plan `mutation` against `state` without changing anything.
///
/// A key repeated inside the mutation keeps its first occurrence.
pub fn plan_full_mutation(state: &CatalogState, mutation: &EntityMutation) -> MutationPlan {
    let EntityMutation::Full {
        location_key,
        entities,
    } = mutation;

    let mut changes = Vec::with_capacity(entities.len());
    let mut incoming: HashSet<&EntityKey> = HashSet::with_capacity(entities.len());

    for entity in entities {
        if !incoming.insert(&entity.key) {
            continue;
        }
        let key = entity.key.clone();
        let change = match state.entities.get(&entity.key) {
            None => EntityChange::Added { key },
            Some(stored) if &stored.entity.location_key != location_key => EntityChange::Conflict {
                key,
                owner: stored.entity.location_key.clone(),
            },
            Some(stored) if stored.hash == entity_hash(&entity.payload) => {
                EntityChange::Unchanged { key }
            }
            Some(_) => EntityChange::Updated { key },
        };
        changes.push(change);
    }

    for stored in state.owned_by(location_key) {
        if !incoming.contains(&stored.entity.key) {
            changes.push(EntityChange::Removed {
                key: stored.entity.key.clone(),
            });
        }
    }

    MutationPlan {
        location_key: location_key.clone(),
        changes,
    }
}

/// Plan and apply `mutation` to `state`, returning the plan that was applied.
pub fn apply_full_mutation(
    state: &mut CatalogState,
    mutation: &EntityMutation,
    now: DateTime<Utc>,
) -> MutationPlan {
    let plan = plan_full_mutation(state, mutation);
    let EntityMutation::Full {
        location_key,
        entities,
    } = mutation;
    let mut by_key: BTreeMap<&EntityKey, &DerivedEntity> = BTreeMap::new();
    for entity in entities {
        by_key.entry(&entity.key).or_insert(entity);
    }

    for change in &plan.changes {
        match change {
            EntityChange::Added { key } | EntityChange::Updated { key } => {
                if let Some(entity) = by_key.get(key) {
                    // Ownership is the mutation's, whatever the mapper tagged.
                    let mut entity = (*entity).clone();
                    entity.location_key = location_key.clone();
                    state.entities.insert(
                        key.clone(),
                        StoredEntity {
                            hash: entity_hash(&entity.payload),
                            entity,
                            updated_at: now,
                        },
                    );
                }
            }
            EntityChange::Removed { key } => {
                state.entities.remove(key);
                state.refresh_requests.remove(key);
            }
            EntityChange::Unchanged { .. } | EntityChange::Conflict { .. } => {}
        }
    }
    plan
}

/// SHA-256 hex digest of the canonical (key-sorted, compact) JSON form of `payload`.
pub fn entity_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(key: &str, location: &str, payload: Value) -> DerivedEntity {
        DerivedEntity {
            key: EntityKey::from(key),
            location_key: LocationKey::from(location),
            payload,
        }
    }

    fn full(location: &str, entities: Vec<DerivedEntity>) -> EntityMutation {
        EntityMutation::Full {
            location_key: LocationKey::from(location),
            entities,
        }
    }

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"a": 1, "b": {"x": true, "y": [1, 2]}});
        let b = json!({"b": {"y": [1, 2], "x": true}, "a": 1});
        assert_eq!(entity_hash(&a), entity_hash(&b));
        assert_ne!(entity_hash(&a), entity_hash(&json!({"a": 2})));
    }

    #[test]
    fn first_mutation_adds_everything() {
        let state = CatalogState::default();
        let plan = plan_full_mutation(
            &state,
            &full("A", vec![entity("k1", "A", json!({})), entity("k2", "A", json!({}))]),
        );
        assert_eq!(plan.summary().added, 2);
        assert_eq!(plan.owned_keys().len(), 2);
    }

    #[test]
    fn reapplying_is_a_noop() {
        let mut state = CatalogState::default();
        let mutation = full("A", vec![entity("k1", "A", json!({"v": 1}))]);
        apply_full_mutation(&mut state, &mutation, Utc::now());
        let before = state.entities.clone();

        let plan = apply_full_mutation(&mut state, &mutation, Utc::now());
        assert!(plan.summary().is_noop());
        assert_eq!(plan.summary().unchanged, 1);
        assert_eq!(state.entities.len(), 1);
        assert_eq!(state.entities, before, "unchanged entities keep their timestamp");
    }

    #[test]
    fn changed_payload_is_updated_and_missing_is_removed() {
        let mut state = CatalogState::default();
        apply_full_mutation(
            &mut state,
            &full("A", vec![entity("k1", "A", json!({"v": 1})), entity("k2", "A", json!({}))]),
            Utc::now(),
        );

        let plan = apply_full_mutation(
            &mut state,
            &full("A", vec![entity("k1", "A", json!({"v": 2}))]),
            Utc::now(),
        );
        let summary = plan.summary();
        assert_eq!((summary.updated, summary.removed), (1, 1));
        assert_eq!(state.entities.len(), 1);
        assert_eq!(state.entities[&EntityKey::from("k1")].entity.payload, json!({"v": 2}));
    }

    #[test]
    fn other_owner_is_untouched_and_reported_as_conflict() {
        let mut state = CatalogState::default();
        apply_full_mutation(
            &mut state,
            &full("B", vec![entity("shared", "B", json!({"from": "B"})), entity("b-only", "B", json!({}))]),
            Utc::now(),
        );

        let plan = apply_full_mutation(
            &mut state,
            &full("A", vec![entity("shared", "A", json!({"from": "A"}))]),
            Utc::now(),
        );
        assert_eq!(plan.summary().conflicts, 1);
        assert_eq!(
            plan.conflicts().next(),
            Some(&EntityChange::Conflict {
                key: EntityKey::from("shared"),
                owner: LocationKey::from("B"),
            })
        );
        assert_eq!(
            state.entities[&EntityKey::from("shared")].entity.payload,
            json!({"from": "B"})
        );
        assert_eq!(state.count_owned_by(&LocationKey::from("B")), 2);
    }

    #[test]
    fn empty_full_mutation_removes_only_own_entities() {
        let mut state = CatalogState::default();
        apply_full_mutation(&mut state, &full("A", vec![entity("a", "A", json!({}))]), Utc::now());
        apply_full_mutation(&mut state, &full("B", vec![entity("b", "B", json!({}))]), Utc::now());

        let plan = apply_full_mutation(&mut state, &full("A", vec![]), Utc::now());
        assert_eq!(plan.summary().removed, 1);
        assert_eq!(state.entities.len(), 1);
        assert!(state.entities.contains_key(&EntityKey::from("b")));
    }

    #[test]
    fn entity_tagged_for_another_location_belongs_to_the_mutation() {
        let mut state = CatalogState::default();
        let a = full("A", vec![entity("k", "B", json!({"v": 1}))]);

        let plan = apply_full_mutation(&mut state, &a, Utc::now());
        assert_eq!(plan.summary().added, 1);
        assert_eq!(state.count_owned_by(&LocationKey::from("A")), 1);
        assert_eq!(state.count_owned_by(&LocationKey::from("B")), 0);

        let plan = apply_full_mutation(&mut state, &full("B", vec![]), Utc::now());
        assert_eq!(plan.summary().removed, 0);
        assert_eq!(state.entities.len(), 1);

        let plan = apply_full_mutation(&mut state, &a, Utc::now());
        assert_eq!((plan.summary().added, plan.summary().unchanged), (0, 1));
    }

    #[test]
    fn duplicate_keys_in_one_mutation_keep_first() {
        let mut state = CatalogState::default();
        let plan = apply_full_mutation(
            &mut state,
            &full(
                "A",
                vec![entity("k", "A", json!({"n": 1})), entity("k", "A", json!({"n": 2}))],
            ),
            Utc::now(),
        );
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(state.entities[&EntityKey::from("k")].entity.payload, json!({"n": 1}));
    }
}
