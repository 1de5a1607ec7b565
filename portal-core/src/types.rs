//! Domain types shared by the reconciler and the feature-flag store.
//!
//! All types are serializable/deserializable via serde so they can cross the
//! daemon socket, the file catalog and the storage transports unchanged.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype!(
    /// Identifier of a configured entity provider (e.g. `"azure-devops"`).
    ProviderId
);

string_newtype!(
    /// Provenance tag scoping ownership of stored entities to one provider instance.
    LocationKey
);

string_newtype!(
    /// Stable identity used for upsert/delete matching in the catalog.
    EntityKey
);

string_newtype!(
    /// Globally unique feature flag name.
    FlagName
);

string_newtype!(
    /// Owner of a feature flag, used for conflict diagnostics.
    PluginId
);

impl LocationKey {
    /// Default location key for a provider: `provider:<id>`.
    pub fn for_provider(provider: &ProviderId) -> Self {
        Self(format!("provider:{}", provider.0))
    }
}

impl EntityKey {
    /// Key derived from the remote identifier plus the provider name.
    pub fn derive(provider: &ProviderId, remote_id: &str) -> Self {
        Self(format!("{}:{}", provider.0, remote_id))
    }
}

// ---------------------------------------------------------------------------
// Reconciliation records
// ---------------------------------------------------------------------------

/// A record obtained from an external system, validated at the fetch boundary.
///
/// Fetched fresh on every pass and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Stable remote identifier.
    pub id: String,
    /// Descriptive fields as delivered by the remote.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Derived annotations (string-valued only).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl RemoteRecord {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Local representation of a [`RemoteRecord`] suitable for the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEntity {
    pub key: EntityKey,
    pub location_key: LocationKey,
    /// Free-form entity body.
    pub payload: Value,
}

/// A batch operation applied to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntityMutation {
    /// Replace the entire set of entities owned by `location_key` with exactly `entities`.
    Full {
        location_key: LocationKey,
        entities: Vec<DerivedEntity>,
    },
}

impl EntityMutation {
    pub fn location_key(&self) -> &LocationKey {
        match self {
            EntityMutation::Full { location_key, .. } => location_key,
        }
    }
}

// ---------------------------------------------------------------------------
// Feature flags
// ---------------------------------------------------------------------------

/// Where a flag's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlagPersistence {
    /// Durable per-user storage.
    #[default]
    Persisted,
    /// Ephemeral local session state.
    Session,
}

/// A named boolean setting declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: FlagName,
    pub plugin_id: PluginId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub persistence: FlagPersistence,
}

impl FeatureFlag {
    pub fn persisted(name: impl Into<FlagName>, plugin_id: impl Into<PluginId>) -> Self {
        Self {
            name: name.into(),
            plugin_id: plugin_id.into(),
            description: None,
            persistence: FlagPersistence::Persisted,
        }
    }

    pub fn session(name: impl Into<FlagName>, plugin_id: impl Into<PluginId>) -> Self {
        Self {
            persistence: FlagPersistence::Session,
            ..Self::persisted(name, plugin_id)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.persistence == FlagPersistence::Persisted
    }
}

// ---------------------------------------------------------------------------
// Storage snapshots
// ---------------------------------------------------------------------------

/// Whether an observed key currently has any stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Present,
    Absent,
}

/// Unit delivered to observers of a stored value.
///
/// `value` is `Some` exactly when `presence` is [`Presence::Present`]; use the
/// constructors to keep that true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageValueSnapshot<T> {
    pub key: String,
    pub presence: Presence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
}

impl<T> StorageValueSnapshot<T> {
    pub fn present(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            presence: Presence::Present,
            value: Some(value),
        }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            presence: Presence::Absent,
            value: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newtype_display() {
        assert_eq!(ProviderId::from("ado").to_string(), "ado");
        assert_eq!(FlagName::from("beta-ui").to_string(), "beta-ui");
        assert_eq!(EntityKey::from("k").as_str(), "k");
    }

    #[test]
    fn derived_keys() {
        let provider = ProviderId::from("linguist");
        assert_eq!(LocationKey::for_provider(&provider).0, "provider:linguist");
        assert_eq!(EntityKey::derive(&provider, "repo-1").0, "linguist:repo-1");
    }

    #[test]
    fn full_mutation_serializes_with_type_tag() {
        let mutation = EntityMutation::Full {
            location_key: LocationKey::from("provider:a"),
            entities: vec![],
        };
        let value = serde_json::to_value(&mutation).expect("serialize");
        assert_eq!(value["type"], json!("full"));
        assert_eq!(value["location_key"], json!("provider:a"));
    }

    #[test]
    fn snapshot_constructors_keep_value_and_presence_aligned() {
        let present = StorageValueSnapshot::present("beta-ui", true);
        assert!(present.is_present());
        assert_eq!(present.value, Some(true));

        let absent = StorageValueSnapshot::<bool>::absent("beta-ui");
        assert_eq!(absent.presence, Presence::Absent);
        assert!(absent.value.is_none());
        let value = serde_json::to_value(&absent).expect("serialize");
        assert_eq!(value, json!({"key": "beta-ui", "presence": "absent"}));
    }

    #[test]
    fn flag_defaults_to_persisted() {
        let flag: FeatureFlag =
            serde_json::from_value(json!({"name": "x", "plugin_id": "a"})).expect("parse");
        assert!(flag.is_persisted());
        assert!(!FeatureFlag::session("y", "b").is_persisted());
    }
}
