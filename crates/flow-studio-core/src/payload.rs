//! Test input payloads for API-triggered flows.
//!
//! [`PayloadEditor`] keeps a single structured value. The JSON text view is rendered from it on
//! demand and every edit (raw JSON or a form field) goes through a parser that either replaces the
//! value or leaves it untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::errors::{ValidationError, ValidationErrorKind};

/// Declared field type of an input property. A property without a `type` accepts anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    /// No declared type, or one this client does not check; values are accepted as-is.
    #[default]
    #[serde(other)]
    Any,
}

impl FieldType {
    pub fn is_any(&self) -> bool {
        matches!(self, FieldType::Any)
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Number => "a number",
            FieldType::Integer => "an integer",
            FieldType::Boolean => "true or false",
            FieldType::Object => "a JSON object",
            FieldType::Array => "a JSON array",
            FieldType::Any => "a value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "FieldType::is_any")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Subset of JSON Schema declared by an API trigger: an object with typed properties.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn is_required(&self, field: &str) -> bool {
        self.required.iter().any(|r| r == field)
    }

    pub fn field_type(&self, field: &str) -> FieldType {
        self.properties
            .get(field)
            .map(|p| p.field_type)
            .unwrap_or(FieldType::Any)
    }

    /// Declared properties with their required flag, in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &PropertySchema, bool)> {
        self.properties
            .iter()
            .map(|(name, prop)| (name.as_str(), prop, self.is_required(name)))
    }
}

fn invalid_input(message: impl Into<String>) -> ValidationError {
    ValidationError::new(ValidationErrorKind::InvalidTestInput, message)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Check a test input against the trigger's schema: an object, required fields present and
/// non-empty, declared types respected.
pub fn validate_input(schema: &InputSchema, input: &Value) -> Result<(), ValidationError> {
    let Value::Object(fields) = input else {
        return Err(invalid_input("test input must be a JSON object"));
    };
    for name in &schema.required {
        if fields.get(name).is_none_or(is_blank) {
            return Err(ValidationError::new(
                ValidationErrorKind::MissingRequiredField,
                format!("\"{name}\" is required"),
            ));
        }
    }
    for (name, value) in fields {
        if value.is_null() {
            continue;
        }
        let expected = schema.field_type(name);
        if !expected.matches(value) {
            return Err(invalid_input(format!(
                "\"{name}\" must be {}",
                expected.name()
            )));
        }
    }
    Ok(())
}

/// Parse raw JSON text into an input object.
pub fn parse_input_text(text: &str) -> Result<Map<String, Value>, ValidationError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| invalid_input(format!("invalid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_input("test input must be a JSON object")),
    }
}

/// Which editor view the user is working in. Both views read and write the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    #[default]
    Form,
    Json,
}

/// Editor state for a test input payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PayloadEditor {
    schema: Option<InputSchema>,
    value: Map<String, Value>,
    mode: PayloadMode,
}

impl PayloadEditor {
    pub fn new(schema: Option<InputSchema>) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    pub fn schema(&self) -> Option<&InputSchema> {
        self.schema.as_ref()
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PayloadMode) {
        self.mode = mode;
    }

    pub fn value(&self) -> &Map<String, Value> {
        &self.value
    }

    /// Pretty-printed JSON view of the current value.
    pub fn json_text(&self) -> String {
        format!("{:#}", Value::Object(self.value.clone()))
    }

    /// Replace the value from raw JSON text. Text that does not parse to an object is rejected and
    /// the current value is kept.
    pub fn apply_json_text(&mut self, text: &str) -> Result<(), ValidationError> {
        self.value = parse_input_text(text)?;
        Ok(())
    }

    /// Text shown in a form field for `field`.
    pub fn field_text(&self, field: &str) -> String {
        match self.value.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Set one field from form text, coerced by its declared type. Empty text removes the field.
    pub fn set_field_text(&mut self, field: &str, text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            self.value.remove(field);
            return Ok(());
        }
        let field_type = self
            .schema
            .as_ref()
            .map_or(FieldType::Any, |s| s.field_type(field));
        let value = coerce_field(field, field_type, text)?;
        self.value.insert(field.to_string(), value);
        Ok(())
    }

    /// Validated value ready for submission.
    pub fn validate(&self) -> Result<Value, ValidationError> {
        let value = Value::Object(self.value.clone());
        if let Some(schema) = &self.schema {
            validate_input(schema, &value)?;
        }
        Ok(value)
    }
}

fn coerce_field(field: &str, field_type: FieldType, text: &str) -> Result<Value, ValidationError> {
    let trimmed = text.trim();
    let mismatch = || invalid_input(format!("\"{field}\" must be {}", field_type.name()));
    match field_type {
        FieldType::String => Ok(Value::String(text.to_string())),
        FieldType::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch()),
        FieldType::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(mismatch),
        FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        FieldType::Object | FieldType::Array => serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(|v| field_type.matches(v))
            .ok_or_else(mismatch),
        FieldType::Any => {
            Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string())))
        }
    }
}
