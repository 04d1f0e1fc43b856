use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logic::containers::Namespaces;
use crate::logic::registry::SharedRegistry;
use crate::model::field::prepare_json;
use crate::model::{FieldValue, FormSchema, Id};

/// Identity of a record type plus its ancestry. Namespace lookups walk the
/// type itself first, then its ancestors in order, mirroring how the
/// persistence layer resolves inherited behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: Id,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<Id>,
}

impl RecordType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ancestors: Vec::new(),
        }
    }

    pub fn with_ancestors(name: &str, ancestors: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            ancestors: ancestors.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// The type itself followed by its ancestors, most specific first.
    pub fn mro(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.ancestors.iter().map(|a| a.as_str()))
    }
}

/// A foreign key declared on a record type, pointing at a target type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub name: String,
    /// Name of the record type this key points at.
    pub target: Id,
    #[serde(default)]
    pub unique: bool,
}

/// Static metadata for a record type: its identity, its own declared base
/// fields and its foreign keys. This is the "enumerate declared fields"
/// contract the surrounding persistence layer provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub record_type: RecordType,
    pub schema: FormSchema,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl RecordMeta {
    pub fn new(record_type: RecordType, schema: FormSchema) -> Self {
        Self {
            record_type,
            schema,
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_foreign_keys(mut self, foreign_keys: Vec<ForeignKeyDef>) -> Self {
        self.foreign_keys = foreign_keys;
        self
    }
}

/// Resolve the foreign key linking `child` to `parent`: by explicit name when
/// given, otherwise the single key targeting the parent type (or one of its
/// ancestors). Fails when no key or more than one key matches.
pub fn find_foreign_key<'a>(
    parent: &RecordMeta,
    child: &'a RecordMeta,
    fk_name: Option<&str>,
) -> Result<&'a ForeignKeyDef> {
    let parent_names: Vec<&str> = parent.record_type.mro().collect();

    if let Some(name) = fk_name {
        let fk = child
            .foreign_keys
            .iter()
            .find(|fk| fk.name == name)
            .ok_or_else(|| {
                anyhow!(
                    "record type '{}' has no foreign key named '{}'",
                    child.record_type.name,
                    name
                )
            })?;
        if !parent_names.contains(&fk.target.as_str()) {
            return Err(anyhow!(
                "foreign key '{}' targets '{}', not '{}'",
                name,
                fk.target,
                parent.record_type.name
            ));
        }
        return Ok(fk);
    }

    let matches: Vec<&ForeignKeyDef> = child
        .foreign_keys
        .iter()
        .filter(|fk| parent_names.contains(&fk.target.as_str()))
        .collect();
    match matches.as_slice() {
        [fk] => Ok(fk),
        [] => Err(anyhow!(
            "record type '{}' has no foreign key to '{}'",
            child.record_type.name,
            parent.record_type.name
        )),
        _ => Err(anyhow!(
            "record type '{}' has more than one foreign key to '{}', specify one by name",
            child.record_type.name,
            parent.record_type.name
        )),
    }
}

/// One record instance: its base field values plus the namespaced data
/// container that will be persisted as the blob column.
#[derive(Debug)]
pub struct Record {
    pub id: Option<Id>,
    pub meta: Arc<RecordMeta>,
    pub values: HashMap<String, FieldValue>,
    pub app_data: Namespaces,
}

impl Record {
    /// Construct an empty record instance of the given type.
    pub fn new(meta: Arc<RecordMeta>, registry: SharedRegistry) -> Self {
        let app_data = Namespaces::new(meta.record_type.clone(), registry);
        Self {
            id: None,
            meta,
            values: HashMap::new(),
            app_data,
        }
    }

    pub fn set_value(&mut self, name: &str, value: FieldValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Base field values in storage form; declared fields serialize through
    /// their definitions, anything else through plain JSON conversion.
    pub fn values_to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (name, value) in &self.values {
            let json = match self.meta.schema.get_field(name) {
                Some(field) => field.prepare_value(value),
                None => prepare_json(value),
            };
            out.insert(name.clone(), json);
        }
        out
    }

    /// Rehydrate base field values from their storage form.
    pub fn values_from_json(&mut self, stored: &Map<String, Value>) {
        self.values.clear();
        for (name, raw) in stored {
            let value = match self.meta.schema.get_field(name) {
                Some(field) => field
                    .to_native(raw)
                    .unwrap_or_else(|_| FieldValue::from_json(raw.clone())),
                None => FieldValue::from_json(raw.clone()),
            };
            self.values.insert(name.clone(), value);
        }
    }
}
