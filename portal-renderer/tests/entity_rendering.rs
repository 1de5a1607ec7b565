use std::collections::BTreeMap;

use portal_core::types::{LocationKey, ProviderId, RemoteRecord};
use portal_renderer::{RenderError, TemplateContext, TemplateEngine};
use rstest::rstest;
use serde_json::json;
use tempfile::TempDir;

fn make_record() -> RemoteRecord {
    RemoteRecord {
        id: "app-7".to_string(),
        fields: json!({
            "name": "Checkout Service",
            "owner": "team-checkout",
            "description": "Takes orders",
            "lifecycle": "experimental",
            "tags": ["java", "payments"]
        })
        .as_object()
        .cloned()
        .unwrap(),
        annotations: BTreeMap::from([(
            "mta.konveyor.io/application-id".to_string(),
            "7".to_string(),
        )]),
    }
}

fn make_context() -> TemplateContext {
    TemplateContext::from_record(
        &make_record(),
        &ProviderId::from("mta"),
        &LocationKey::from("provider:mta"),
    )
}

#[test]
fn component_includes_record_and_provenance() {
    let engine = TemplateEngine::new().unwrap();
    let body = engine.render_entity("component", &make_context()).unwrap();

    assert_eq!(body["apiVersion"], json!("backstage.io/v1alpha1"));
    assert_eq!(body["metadata"]["name"], json!("Checkout-Service"));
    assert_eq!(body["metadata"]["title"], json!("Checkout Service"));
    assert_eq!(body["metadata"]["tags"], json!(["java", "payments"]));
    assert_eq!(body["spec"]["lifecycle"], json!("experimental"));

    let annotations = &body["metadata"]["annotations"];
    assert_eq!(annotations["mta.konveyor.io/application-id"], json!("7"));
    assert_eq!(annotations["portal.dev/managed-by-location"], json!("provider:mta"));
    assert_eq!(annotations["portal.dev/provider"], json!("mta"));
}

#[rstest]
#[case("component", "Component")]
#[case("resource", "Resource")]
#[case("COMPONENT", "Component")]
fn builtin_kinds(#[case] template: &str, #[case] kind: &str) {
    let engine = TemplateEngine::new().unwrap();
    let body = engine.render_entity(template, &make_context()).unwrap();
    assert_eq!(body["kind"], json!(kind));
}

#[test]
fn user_template_adds_new_kind() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("system.yaml.tera"),
        "apiVersion: backstage.io/v1alpha1\nkind: System\n{% include \"_partials/metadata.tera\" %}\nspec:\n  owner: {{ entity.owner | json_encode() }}\n",
    )
    .unwrap();

    let engine = TemplateEngine::with_user_templates(Some(tmp.path())).unwrap();
    assert_eq!(engine.template_names(), ["component", "resource", "system"]);

    let body = engine.render_entity("system", &make_context()).unwrap();
    assert_eq!(body["kind"], json!("System"));
    assert_eq!(body["spec"]["owner"], json!("team-checkout"));
}

#[test]
fn user_template_overrides_builtin() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("component.yaml.tera"),
        "kind: Component\nmetadata:\n  name: {{ entity.name | json_encode() }}\nspec:\n  custom: true\n",
    )
    .unwrap();

    let engine = TemplateEngine::with_user_templates(Some(tmp.path())).unwrap();
    let body = engine.render_entity("component", &make_context()).unwrap();
    assert_eq!(body["spec"]["custom"], json!(true));
}

#[test]
fn missing_user_dir_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let engine = TemplateEngine::with_user_templates(Some(&tmp.path().join("absent"))).unwrap();
    assert_eq!(engine.template_names(), ["component", "resource"]);
}

#[test]
fn non_mapping_output_is_rejected() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("scalar.yaml.tera"), "just a string\n").unwrap();
    let engine = TemplateEngine::with_user_templates(Some(tmp.path())).unwrap();

    let err = engine.render_entity("scalar", &make_context()).unwrap_err();
    assert!(matches!(err, RenderError::NotAMapping { .. }), "got: {err}");
}

#[test]
fn invalid_yaml_output_is_rejected() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("broken.yaml.tera"), "a: [unclosed\n").unwrap();
    let engine = TemplateEngine::with_user_templates(Some(tmp.path())).unwrap();

    let err = engine.render_entity("broken", &make_context()).unwrap_err();
    assert!(matches!(err, RenderError::Yaml { .. }), "got: {err}");
}
