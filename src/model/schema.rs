use serde::{Deserialize, Serialize};

use crate::model::{FieldDef, Id};

/// Declarative field set for one namespace. This is what gets registered in
/// a namespace registry and what data containers clean and serialize
/// against. A schema with no fields behaves as a plain untyped mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSchema {
    pub name: Id,
    pub fields: Vec<FieldDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FormSchema {
    pub fn new(name: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            description: None,
        }
    }

    /// Schema with no declared fields; containers built from it behave as
    /// plain dictionaries.
    pub fn empty(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    /// Find a field definition by name
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }
}
