//! Declared output schemas for tasks (spec §3 "Task").

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The primitive types a task's structured output field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
}

impl FieldType {
    /// Coerces a loosely-typed JSON value to this field's declared type.
    ///
    /// Used by the Knowledge Store's query engine (spec §4.5) which must
    /// coerce filter values through the schema type of the target field
    /// before comparing, and by the Commander's OUTPUT-block validator
    /// (spec §4.7) which corrects near-miss JSON before giving up.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (FieldType::String, Value::String(_)) => Some(value.clone()),
            (FieldType::String, v) => Some(Value::String(v.to_string())),
            (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(value.clone())
            }
            (FieldType::Integer, Value::Number(n)) => n.as_f64().and_then(|f| {
                if f.fract() == 0.0 {
                    Some(Value::from(f as i64))
                } else {
                    None
                }
            }),
            (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (FieldType::Number, Value::Number(_)) => Some(value.clone()),
            (FieldType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
            (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::String, Value::String(_))
                | (FieldType::Number, Value::Number(_))
                | (FieldType::Integer, Value::Number(_))
                | (FieldType::Boolean, Value::Bool(_))
        )
    }
}

/// A single field in a task's declared output schema.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// An ordered list of declared output fields. Preserves declaration order
/// because it doubles as the field order the Commander is instructed to
/// emit in its OUTPUT block.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct OutputSchema {
    pub fields: Vec<OutputField>,
}

/// What `Task::validate_output` reports back when an OUTPUT block fails
/// validation (spec §4.7, up to 3 correction rounds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub field: String,
    pub reason: String,
}

impl OutputSchema {
    pub fn field(&self, name: &str) -> Option<&OutputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates and coerces a candidate output object against this schema.
    /// Required fields missing, or present fields whose value cannot be
    /// coerced to the declared type, are reported as violations.
    pub fn validate(&self, candidate: &Value) -> Result<Value, Vec<SchemaViolation>> {
        let mut violations = Vec::new();
        let mut out = serde_json::Map::new();

        let obj = match candidate.as_object() {
            Some(o) => o,
            None => {
                return Err(vec![SchemaViolation {
                    field: "$".to_string(),
                    reason: "OUTPUT block is not a JSON object".to_string(),
                }]);
            }
        };

        for field in &self.fields {
            match obj.get(&field.name) {
                Some(v) => match field.field_type.coerce(v) {
                    Some(coerced) => {
                        out.insert(field.name.clone(), coerced);
                    }
                    None => violations.push(SchemaViolation {
                        field: field.name.clone(),
                        reason: format!("cannot coerce to {:?}", field.field_type),
                    }),
                },
                None if field.required => violations.push(SchemaViolation {
                    field: field.name.clone(),
                    reason: "required field missing".to_string(),
                }),
                None => {}
            }
        }

        if violations.is_empty() {
            Ok(Value::Object(out))
        } else {
            Err(violations)
        }
    }
}
