use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{DataType, FieldValue};

/// Declarative definition of one namespace field: its logical name, data
/// type, requiredness and optional initial value / constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Initial value used when the field has never been written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Display label; defaults to a prettified field name when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            required: None,
            initial: None,
            max_length: None,
            label: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn initial(mut self, initial: Value) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }

    pub fn label_text(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| pretty_name(&self.name))
    }

    /// Convert a raw JSON value into its native typed form. Pure type
    /// conversion: nulls pass through and requiredness is not enforced here,
    /// that is `clean`'s job. Container reads go through this path.
    pub fn to_native(&self, raw: &Value) -> Result<FieldValue, String> {
        if raw.is_null() {
            return Ok(FieldValue::Null);
        }
        match self.data_type {
            DataType::String => match raw {
                Value::String(s) => Ok(FieldValue::Str(s.clone())),
                Value::Number(n) => Ok(FieldValue::Str(n.to_string())),
                Value::Bool(b) => Ok(FieldValue::Str(b.to_string())),
                _ => Err("Enter a valid string.".to_string()),
            },
            DataType::Integer => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| "Enter a whole number.".to_string())
                    .map(FieldValue::Int),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FieldValue::Int)
                    .map_err(|_| "Enter a whole number.".to_string()),
                _ => Err("Enter a whole number.".to_string()),
            },
            DataType::Float => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| "Enter a number.".to_string())
                    .map(FieldValue::Float),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(FieldValue::Float)
                    .map_err(|_| "Enter a number.".to_string()),
                _ => Err("Enter a number.".to_string()),
            },
            DataType::Boolean => match raw {
                Value::Bool(b) => Ok(FieldValue::Bool(*b)),
                Value::String(s) => match s.to_lowercase().as_str() {
                    "true" | "1" | "on" => Ok(FieldValue::Bool(true)),
                    "false" | "0" | "off" | "" => Ok(FieldValue::Bool(false)),
                    _ => Err("Enter a valid boolean value.".to_string()),
                },
                _ => Err("Enter a valid boolean value.".to_string()),
            },
            DataType::Date => match raw {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(FieldValue::Date)
                    .map_err(|_| "Enter a valid date.".to_string()),
                _ => Err("Enter a valid date.".to_string()),
            },
            DataType::DateTime => match raw {
                Value::String(s) => parse_datetime(s.trim())
                    .map(FieldValue::DateTime)
                    .ok_or_else(|| "Enter a valid date/time.".to_string()),
                _ => Err("Enter a valid date/time.".to_string()),
            },
            DataType::StringList => match raw {
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::String(s) => out.push(s.clone()),
                            _ => return Err("Enter a list of strings.".to_string()),
                        }
                    }
                    Ok(FieldValue::List(out))
                }
                _ => Err("Enter a list of strings.".to_string()),
            },
            DataType::Object => match raw {
                Value::Object(_) => Ok(FieldValue::Json(raw.clone())),
                _ => Err("Enter a valid object.".to_string()),
            },
            DataType::Array => match raw {
                Value::Array(_) => Ok(FieldValue::Json(raw.clone())),
                _ => Err("Enter a valid array.".to_string()),
            },
        }
    }

    /// Full cleaning as used by form validation: requiredness, type
    /// conversion and length constraints.
    pub fn clean(&self, raw: &Value) -> Result<FieldValue, String> {
        if raw.is_null() {
            if self.is_required() {
                return Err("This field is required.".to_string());
            }
            // absent optional boolean reads as an unchecked checkbox
            if self.data_type == DataType::Boolean {
                return Ok(FieldValue::Bool(false));
            }
            return Ok(FieldValue::Null);
        }

        let value = self.to_native(raw)?;

        // an empty text submission counts as missing
        if self.is_required() && value.as_str() == Some("") {
            return Err("This field is required.".to_string());
        }

        if let Some(max) = self.max_length {
            let too_long = |s: &str| s.chars().count() > max;
            let violation = match &value {
                FieldValue::Str(s) => too_long(s).then(|| s.chars().count()),
                FieldValue::List(items) => items
                    .iter()
                    .find(|s| too_long(s))
                    .map(|s| s.chars().count()),
                _ => None,
            };
            if let Some(actual) = violation {
                return Err(format!(
                    "Ensure this value has at most {} characters (it has {}).",
                    max, actual
                ));
            }
        }

        Ok(value)
    }

    /// Serialize a cleaned value back to its storage (JSON) form.
    /// Dates become ISO 8601 strings, datetimes RFC 3339.
    pub fn prepare_value(&self, value: &FieldValue) -> Value {
        prepare_json(value)
    }

    /// Cleaned initial value for a field that has never been written. The
    /// initial is cleaned too, so a declared default can never leak shared
    /// or uncleaned state into a container.
    pub fn initial_value(&self) -> FieldValue {
        match &self.initial {
            Some(raw) => self.to_native(raw).unwrap_or(FieldValue::Null),
            None => FieldValue::Null,
        }
    }
}

/// Storage form of a cleaned value, independent of the declaring field.
pub(crate) fn prepare_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(i) => Value::Number((*i).into()),
        FieldValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Str(s) => Value::String(s.clone()),
        FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
        FieldValue::List(items) => Value::Array(
            items.iter().map(|s| Value::String(s.clone())).collect(),
        ),
        FieldValue::Json(v) => v.clone(),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    // date-only input reads as midnight UTC
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Turn a field name into a human readable label: underscores to spaces,
/// first letter capitalized.
pub fn pretty_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}
