//! JSON Schema validation of workspace documents (spec §4.B: "Fails with
//! `SchemaValidationError` on any structural violation").

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use crate::Result;

const INVENTORY_SCHEMA: &str = r#"{
    "type": "array",
    "items": {
        "type": "object",
        "properties": {
            "host": {"type": "string"},
            "labels": {"type": "array", "items": {"type": "string"}},
            "tags": {"type": "object"},
            "cpu": {},
            "memory": {}
        },
        "required": ["host"]
    }
}"#;

const MANIFEST_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "version": {"type": "string"},
        "labels": {"type": "array", "items": {"type": "string"}},
        "resources": {
            "type": "object",
            "properties": {
                "memory": {"type": "object"},
                "cpu": {"type": "object"},
                "ports": {"type": "object"}
            }
        },
        "certs": {"type": "array"},
        "commands": {"type": "object"}
    },
    "required": ["version"]
}"#;

const DISABLED_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "jobs": {"type": "object"},
        "agents": {"type": "array", "items": {"type": "string"}}
    }
}"#;

fn validate_against(schema_src: &str, doc_name: &str, instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_src).expect("embedded schema is valid JSON");
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("embedded schema compiles");
    if let Err(errors) = compiled.validate(instance) {
        let detail = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(fleetctl_definitions::Error::from(fleetctl_definitions::ErrorKind::SchemaValidationError(
            doc_name.to_string(),
            detail,
        ))
        .into());
    }
    Ok(())
}

pub fn validate_inventory(instance: &Value) -> Result<()> {
    validate_against(INVENTORY_SCHEMA, "agents.json", instance)
}

pub fn validate_manifest(job: &str, instance: &Value) -> Result<()> {
    validate_against(MANIFEST_SCHEMA, &format!("jobs/{}/manifest.json", job), instance)
}

pub fn validate_disabled(instance: &Value) -> Result<()> {
    validate_against(DISABLED_SCHEMA, "disabled.json", instance)
}
