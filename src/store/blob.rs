use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::logic::containers::Namespaces;
use crate::logic::forms::ValidationErrors;
use crate::logic::registry::SharedRegistry;
use crate::model::RecordType;

/// Adapter between the blob column's serialized text and the live namespace
/// container. The persistence layer calls `to_native` on load and
/// `to_storage` on save; `validate` surfaces container validation at the
/// field level.
pub struct BlobField;

impl BlobField {
    /// Parse stored blob text into a lazy container. Empty text loads as an
    /// empty container; anything that is not a JSON object is rejected so
    /// that corrupt storage fails loudly instead of flowing through untyped.
    pub fn to_native(
        raw: &str,
        record_type: &RecordType,
        registry: SharedRegistry,
    ) -> Result<Namespaces> {
        let text = raw.trim();
        if text.is_empty() {
            return Ok(Namespaces::new(record_type.clone(), registry));
        }
        let value: Value =
            serde_json::from_str(text).context("app data blob is not valid JSON")?;
        match value {
            Value::Object(map) => Ok(Namespaces::from_raw(record_type.clone(), registry, map)),
            other => Err(anyhow!(
                "app data blob must be a JSON object, got {}",
                json_type_name(&other)
            )),
        }
    }

    /// Serialize the container to blob text. Accessed namespaces serialize
    /// through their schemas; untouched ones reproduce their loaded form.
    pub fn to_storage(container: &mut Namespaces) -> Result<String> {
        Ok(serde_json::to_string(&Value::Object(container.serialize()))?)
    }

    /// Container-level validation: errors grouped per namespace.
    pub fn validate(
        container: &mut Namespaces,
    ) -> Result<(), BTreeMap<String, ValidationErrors>> {
        container.validate()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
