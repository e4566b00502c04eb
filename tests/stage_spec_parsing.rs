//! Stage configuration parsing as stored on pipelines.

use deploy_core::trigger::{StageSpec, TriggerError};

#[test]
fn plugin_steps_parse_with_inputs() {
    let raw = r#"{
        "steps": [
            {
                "name": "Copy container image",
                "plugin_ref": "COPY_CONTAINER_IMAGE",
                "inputs": {
                    "DESTINATION_INFO": "registry.example.com|acme/orders,acme/orders-mirror",
                    "CUSTOM_TAG_ID": "12"
                }
            },
            { "name": "Notify", "inputs": {} }
        ]
    }"#;

    let spec = StageSpec::parse(Some(raw)).unwrap();
    assert!(spec.has_plugin_steps());
    assert_eq!(spec.steps.len(), 2);
    assert_eq!(
        spec.steps[0].plugin_ref.as_deref(),
        Some("COPY_CONTAINER_IMAGE")
    );
    assert_eq!(
        spec.steps[0].inputs.get("CUSTOM_TAG_ID").map(String::as_str),
        Some("12")
    );
    assert!(spec.steps[1].plugin_ref.is_none());
}

#[test]
fn legacy_script_config_has_no_steps() {
    let raw = r#"{ "config": "echo pre-deploy checks" }"#;
    let spec = StageSpec::parse(Some(raw)).unwrap();
    assert!(!spec.has_plugin_steps());
    assert_eq!(spec.config.as_deref(), Some("echo pre-deploy checks"));
}

#[test]
fn missing_or_empty_config_is_an_empty_spec() {
    assert!(!StageSpec::parse(None).unwrap().has_plugin_steps());
    assert!(!StageSpec::parse(Some("")).unwrap().has_plugin_steps());
}

#[test]
fn malformed_config_is_a_validation_error() {
    let err = StageSpec::parse(Some("{steps: [")).unwrap_err();
    assert!(matches!(err, TriggerError::Validation(_)));
    assert_eq!(err.http_status(), 400);
}
