//! # portal-renderer
//!
//! Tera-based template engine that renders catalog entity bodies from remote
//! records.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use portal_core::types::{LocationKey, ProviderId, RemoteRecord};
//! use portal_renderer::TemplateEngine;
//!
//! fn render_one(record: &RemoteRecord) {
//!     let provider = ProviderId::from("inventory");
//!     let location = LocationKey::for_provider(&provider);
//!     if let Ok(engine) = TemplateEngine::new() {
//!         if let Ok(body) = engine.render_record("component", record, &provider, &location) {
//!             println!("{body}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{sanitize_name, TemplateContext};
pub use engine::TemplateEngine;
pub use error::RenderError;
