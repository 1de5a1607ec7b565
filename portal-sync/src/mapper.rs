//! Mapping validated records to catalog entities.

use std::sync::Arc;

use portal_core::types::{DerivedEntity, EntityKey, LocationKey, ProviderId, RemoteRecord};
use portal_renderer::TemplateEngine;

/// Maps one record to exactly one entity, or explains why it cannot.
pub trait EntityMapper: Send + Sync {
    fn map(&self, record: &RemoteRecord) -> Result<DerivedEntity, String>;
}

/// Renders the provider's entity template for each record.
pub struct TemplateMapper {
    provider: ProviderId,
    location_key: LocationKey,
    template: String,
    engine: Arc<TemplateEngine>,
}

impl TemplateMapper {
    pub fn new(
        provider: ProviderId,
        location_key: LocationKey,
        template: impl Into<String>,
        engine: Arc<TemplateEngine>,
    ) -> Self {
        Self {
            provider,
            location_key,
            template: template.into(),
            engine,
        }
    }
}

impl EntityMapper for TemplateMapper {
    fn map(&self, record: &RemoteRecord) -> Result<DerivedEntity, String> {
        let payload = self
            .engine
            .render_record(&self.template, record, &self.provider, &self.location_key)
            .map_err(|e| e.to_string())?;
        Ok(DerivedEntity {
            key: EntityKey::derive(&self.provider, &record.id),
            location_key: self.location_key.clone(),
            payload,
        })
    }
}
