//! The transaction output schema, shared by request assembly and validation.
//!
//! The same field table drives both sides of the inference boundary:
//!
//! * [`TransactionSchema::response_schema`] renders it as the Gemini
//!   `responseSchema` (OpenAPI subset) sent with every request, and
//!   [`TransactionSchema::json_schema`] as standard JSON Schema for providers
//!   that only accept the contract as prompt text;
//! * [`TransactionSchema::check_element`] validates each element of the reply
//!   against it before it is deserialised into a
//!   [`crate::output::Transaction`].
//!
//! Bump [`SCHEMA_VERSION`] whenever a field is added, removed or retyped.

use serde_json::{json, Map, Value};

/// Version of the transaction schema.
pub const SCHEMA_VERSION: u32 = 1;

/// Primitive JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
}

impl FieldKind {
    /// Type name in the Gemini schema dialect.
    fn gemini_type(self) -> &'static str {
        match self {
            FieldKind::String => "STRING",
            FieldKind::Number => "NUMBER",
        }
    }

    /// Type name in standard JSON Schema.
    fn json_type(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
        }
    }
}

/// One field of the transaction record.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

/// The versioned transaction record definition.
#[derive(Debug)]
pub struct TransactionSchema {
    pub version: u32,
    pub fields: &'static [FieldSpec],
}

/// The schema every request and every reply is held to.
pub static TRANSACTION_SCHEMA: TransactionSchema = TransactionSchema {
    version: SCHEMA_VERSION,
    fields: &[
        FieldSpec {
            name: "date",
            kind: FieldKind::String,
            required: true,
            description: "Transaction date in YYYY-MM-DD format.",
        },
        FieldSpec {
            name: "description",
            kind: FieldKind::String,
            required: true,
            description: "Full transaction description.",
        },
        FieldSpec {
            name: "amount",
            kind: FieldKind::Number,
            required: true,
            description: "Transaction amount. Negative for debits, positive for credits.",
        },
        FieldSpec {
            name: "category",
            kind: FieldKind::String,
            required: true,
            description: "Categorization of the transaction.",
        },
        FieldSpec {
            name: "notes",
            kind: FieldKind::String,
            required: false,
            description: "Any relevant notes. Can be empty.",
        },
    ],
};

impl TransactionSchema {
    /// Names of the required fields, in declaration order.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Gemini `responseSchema`: an array of transaction objects.
    pub fn response_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            properties.insert(
                field.name.to_string(),
                json!({
                    "type": field.kind.gemini_type(),
                    "description": field.description,
                }),
            );
        }
        let ordering: Vec<&str> = self.fields.iter().map(|f| f.name).collect();
        let required: Vec<&str> = self.required_fields().collect();

        json!({
            "type": "ARRAY",
            "items": {
                "type": "OBJECT",
                "properties": properties,
                "required": required,
                "propertyOrdering": ordering,
            }
        })
    }

    /// Standard JSON Schema rendering of the same contract.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            properties.insert(
                field.name.to_string(),
                json!({
                    "type": field.kind.json_type(),
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self.required_fields().collect();

        json!({
            "$comment": format!("transaction schema v{}", self.version),
            "type": "array",
            "items": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    /// Check one reply element against the field table.
    ///
    /// Required fields must be present with the right primitive type.
    /// Optional fields may be absent or `null`. Unknown fields are ignored.
    /// Returns a human-readable reason on failure.
    pub fn check_element(&self, element: &Value) -> Result<(), String> {
        let Some(object) = element.as_object() else {
            return Err(format!("expected an object, got {}", json_kind(element)));
        };

        for field in self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required field `{}`", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.matches(value) => {
                    return Err(format!(
                        "field `{}` must be a {}, got {}",
                        field.name,
                        field.kind.json_type(),
                        json_kind(value)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Name of the JSON kind of `value`, for diagnostics.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_schema_lists_every_field() {
        let schema = TRANSACTION_SCHEMA.response_schema();
        assert_eq!(schema["type"], "ARRAY");
        let props = &schema["items"]["properties"];
        for name in ["date", "description", "amount", "category", "notes"] {
            assert!(props.get(name).is_some(), "missing {name}");
        }
        assert_eq!(props["amount"]["type"], "NUMBER");
        assert_eq!(
            schema["items"]["required"],
            json!(["date", "description", "amount", "category"])
        );
    }

    #[test]
    fn json_schema_uses_lowercase_types() {
        let schema = TRANSACTION_SCHEMA.json_schema();
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["properties"]["date"]["type"], "string");
    }

    #[test]
    fn check_element_accepts_minimal_record() {
        let el = json!({
            "date": "2024-01-01",
            "description": "Coffee",
            "amount": -4.5,
            "category": "Dining"
        });
        assert!(TRANSACTION_SCHEMA.check_element(&el).is_ok());
    }

    #[test]
    fn check_element_rejects_missing_and_mistyped_fields() {
        let missing = json!({"date": "2024-01-01", "amount": 1.0, "category": "Other"});
        let err = TRANSACTION_SCHEMA.check_element(&missing).unwrap_err();
        assert!(err.contains("description"), "got: {err}");

        let mistyped = json!({
            "date": "2024-01-01",
            "description": "Salary",
            "amount": "2500.00",
            "category": "Salary"
        });
        let err = TRANSACTION_SCHEMA.check_element(&mistyped).unwrap_err();
        assert!(err.contains("`amount` must be a number"), "got: {err}");
    }

    #[test]
    fn check_element_allows_null_notes() {
        let el = json!({
            "date": "2024-01-01",
            "description": "Coffee",
            "amount": -4.5,
            "category": "Dining",
            "notes": null
        });
        assert!(TRANSACTION_SCHEMA.check_element(&el).is_ok());
    }

    #[test]
    fn check_element_rejects_non_objects() {
        let err = TRANSACTION_SCHEMA.check_element(&json!(42)).unwrap_err();
        assert!(err.contains("number"));
    }
}
