//! Tera rendering engine for catalog entity bodies.
//!
//! # Built-in templates
//!
//! | Name        | Entity kind |
//! |-------------|-------------|
//! | `component` | `Component` |
//! | `resource`  | `Resource`  |
//!
//! A template renders YAML which is then parsed into a JSON entity body.
//! Values should be emitted through `json_encode()` so remote strings can never
//! break the YAML structure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tera::Tera;

use portal_core::types::{LocationKey, ProviderId, RemoteRecord};

use crate::context::TemplateContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    (
        "_partials/metadata.tera",
        include_str!("templates/_partials/metadata.tera"),
    ),
    ("component.yaml.tera", include_str!("templates/component.yaml.tera")),
    ("resource.yaml.tera", include_str!("templates/resource.yaml.tera")),
];

const TEMPLATE_SUFFIX: &str = ".yaml.tera";

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((normalize_template_name(rel), contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for rendering entity bodies with optional user overrides.
///
/// `user_template_dir` may contain `<name>.yaml.tera` files that override or
/// extend the embedded ones. Template names are normalised to lowercase
/// relative paths.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Engine with embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_user_templates(None)
    }

    /// Engine with embedded templates plus overrides found in `user_template_dir`.
    pub fn with_user_templates(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(TemplateEngine {
            tera: build_tera(user_template_dir)?,
        })
    }

    /// Logical names (`component`, `resource`, ...) of every renderable template.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tera
            .get_template_names()
            .filter_map(|name| name.strip_suffix(TEMPLATE_SUFFIX))
            .filter(|name| !name.starts_with('_'))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    pub fn has_template(&self, template: &str) -> bool {
        self.tera
            .get_template_names()
            .any(|name| name == template_file(template))
    }

    /// Render `template` with `ctx` into a YAML string.
    pub fn render_yaml(&self, template: &str, ctx: &TemplateContext) -> Result<String, RenderError> {
        if !self.has_template(template) {
            return Err(RenderError::UnknownTemplate {
                name: template.to_string(),
            });
        }
        let tera_ctx = ctx.to_tera_context()?;
        Ok(self.tera.render(&template_file(template), &tera_ctx)?)
    }

    /// Render `template` with `ctx` and parse the result into a JSON entity body.
    pub fn render_entity(&self, template: &str, ctx: &TemplateContext) -> Result<Value, RenderError> {
        let yaml = self.render_yaml(template, ctx)?;
        let body: Value = serde_yaml::from_str(&yaml).map_err(|source| RenderError::Yaml {
            template: template.to_string(),
            source,
        })?;
        if !body.is_object() {
            return Err(RenderError::NotAMapping {
                template: template.to_string(),
            });
        }
        Ok(body)
    }

    /// Shorthand: build the context for `record` and render it.
    pub fn render_record(
        &self,
        template: &str,
        record: &RemoteRecord,
        provider: &ProviderId,
        location_key: &LocationKey,
    ) -> Result<Value, RenderError> {
        let ctx = TemplateContext::from_record(record, provider, location_key);
        self.render_entity(template, &ctx)
    }
}

fn template_file(template: &str) -> String {
    format!("{}{TEMPLATE_SUFFIX}", template.to_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(id: &str, fields: Value) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
            annotations: BTreeMap::new(),
        }
    }

    fn render(template: &str, rec: &RemoteRecord) -> Result<Value, RenderError> {
        TemplateEngine::new().unwrap().render_record(
            template,
            rec,
            &ProviderId::from("inventory"),
            &LocationKey::from("provider:inventory"),
        )
    }

    #[test]
    fn engine_new_succeeds() {
        TemplateEngine::new().expect("embedded templates parse");
    }

    #[test]
    fn builtin_template_names() {
        let engine = TemplateEngine::new().unwrap();
        assert_eq!(engine.template_names(), ["component", "resource"]);
    }

    #[test]
    fn component_renders_expected_shape() {
        let body = render(
            "component",
            &record("svc-1", json!({"name": "billing", "owner": "team-a", "type": "website"})),
        )
        .unwrap();
        assert_eq!(body["kind"], json!("Component"));
        assert_eq!(body["metadata"]["name"], json!("billing"));
        assert_eq!(body["spec"]["owner"], json!("team-a"));
        assert_eq!(body["spec"]["type"], json!("website"));
        assert_eq!(body["spec"]["lifecycle"], json!("production"));
        assert_eq!(
            body["metadata"]["annotations"]["portal.dev/source-id"],
            json!("svc-1")
        );
    }

    #[test]
    fn resource_renders_kind() {
        let body = render("resource", &record("db-1", json!({}))).unwrap();
        assert_eq!(body["kind"], json!("Resource"));
        assert_eq!(body["spec"]["type"], json!("external"));
    }

    #[test]
    fn hostile_strings_cannot_break_yaml() {
        let body = render(
            "component",
            &record(
                "x",
                json!({"name": "ok", "description": "line1\nkind: Evil\n  - {", "owner": "a: b"}),
            ),
        )
        .unwrap();
        assert_eq!(body["kind"], json!("Component"));
        assert_eq!(body["metadata"]["description"], json!("line1\nkind: Evil\n  - {"));
        assert_eq!(body["spec"]["owner"], json!("a: b"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = render("nope", &record("x", json!({}))).unwrap_err();
        assert!(matches!(err, RenderError::UnknownTemplate { .. }), "got: {err}");
    }

    #[test]
    fn no_crlf_in_rendered_yaml() {
        let engine = TemplateEngine::new().unwrap();
        let ctx = TemplateContext::from_record(
            &record("x", json!({"name": "n"})),
            &ProviderId::from("p"),
            &LocationKey::from("provider:p"),
        );
        for name in engine.template_names() {
            let yaml = engine.render_yaml(&name, &ctx).unwrap();
            assert!(!yaml.contains('\r'), "{name} rendered CR characters");
        }
    }
}
