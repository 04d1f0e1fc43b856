use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Declared type of a namespace field. Drives cleaning of raw JSON values
/// into typed values and serialization back to storage form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "stringlist")]
    StringList,
    Object,
    Array,
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}
