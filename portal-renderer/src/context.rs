//! Template context: serializable rendering payload built from a [`RemoteRecord`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use portal_core::types::{LocationKey, ProviderId, RemoteRecord};

use crate::error::RenderError;

/// Annotation carrying the owning location key.
pub const ANNOTATION_LOCATION: &str = "portal.dev/managed-by-location";
/// Annotation carrying the remote identifier.
pub const ANNOTATION_SOURCE_ID: &str = "portal.dev/source-id";
/// Annotation carrying the provider id.
pub const ANNOTATION_PROVIDER: &str = "portal.dev/provider";

const MAX_NAME_LEN: usize = 63;

/// Rendering payload for one entity.
///
/// Templates see:
/// - `entity`: normalized identity fields (`name`, `title`, `description`, `owner`, `tags`)
/// - `fields`: the record's raw fields
/// - `annotations`: record annotations plus the provenance annotations
/// - `provider`: provider id and location key
/// - `meta`: render time and tool version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    pub entity: EntityCtx,
    pub fields: Map<String, Value>,
    pub annotations: BTreeMap<String, String>,
    pub provider: ProviderCtx,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCtx {
    pub id: String,
    /// Catalog-safe name derived from the record's `name` field or its id.
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub owner: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCtx {
    pub id: String,
    pub location_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub portal_version: String,
    pub rendered_at: DateTime<Utc>,
}

impl TemplateContext {
    /// Build a [`TemplateContext`] for `record` as seen by `provider`.
    pub fn from_record(
        record: &RemoteRecord,
        provider: &ProviderId,
        location_key: &LocationKey,
    ) -> Self {
        let raw_name = record.field_str("name").unwrap_or(&record.id);
        let title = record
            .field_str("title")
            .or_else(|| record.field_str("name"))
            .filter(|title| *title != sanitize_name(raw_name))
            .map(str::to_string);

        let tags = record
            .fields
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(|tag| sanitize_name(tag).to_lowercase())
                    .filter(|tag| !tag.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut annotations = record.annotations.clone();
        annotations.insert(ANNOTATION_LOCATION.to_string(), location_key.to_string());
        annotations.insert(ANNOTATION_SOURCE_ID.to_string(), record.id.clone());
        annotations.insert(ANNOTATION_PROVIDER.to_string(), provider.to_string());

        TemplateContext {
            entity: EntityCtx {
                id: record.id.clone(),
                name: sanitize_name(raw_name),
                title,
                description: record.field_str("description").map(str::to_string),
                owner: record.field_str("owner").unwrap_or("unknown").to_string(),
                tags,
            },
            fields: record.fields.clone(),
            annotations,
            provider: ProviderCtx {
                id: provider.to_string(),
                location_key: location_key.to_string(),
            },
            meta: MetaCtx {
                portal_version: env!("CARGO_PKG_VERSION").to_string(),
                rendered_at: Utc::now(),
            },
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

/// Reduce `raw` to the catalog name alphabet: `[A-Za-z0-9-_.]`, at most 63
/// characters, starting and ending with an alphanumeric.
pub fn sanitize_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let mut name: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    while name.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        name.pop();
    }
    name
}
