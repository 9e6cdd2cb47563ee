//! Schema validation.
//!
//! Checks a JSON configuration against a [`Schema`]: presence of required
//! attributes, value types, mutually exclusive attributes and allowed values.
//!
//! # Example
//!
//! ```
//! use equinix_metal_provider::schema::{Attribute, Schema};
//! use equinix_metal_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("port_id", Attribute::required_string())
//!     .with_attribute("bonded", Attribute::required_bool());
//!
//! assert!(validate(&schema, &json!({"port_id": "p1", "bonded": true})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"port_id": "p1", "bonded": "yes"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("bonded".to_string()));
//! ```

use serde_json::Value;

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};

/// Validate a JSON value against a schema.
///
/// Returns one diagnostic per problem; an empty list means the value is
/// valid. Computed-only attributes are not checked. Null values and empty
/// collections count as not set.
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            check_required(schema, &serde_json::Map::new(), &mut diagnostics);
            return diagnostics;
        },
        other => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(other))),
            );
            return diagnostics;
        },
    };

    check_required(schema, obj, &mut diagnostics);
    for (name, attr) in &schema.attributes {
        if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
            continue;
        }
        let Some(value) = obj.get(name).filter(|v| is_set(v)) else {
            continue;
        };

        validate_type(&attr.attr_type, value, name, &mut diagnostics);
        validate_allowed(attr, value, name, &mut diagnostics);

        for other in &attr.conflicts_with {
            // A pair declared on both sides is reported by its first attribute.
            let mutual = schema
                .attribute(other)
                .is_some_and(|o| o.conflicts_with.iter().any(|n| n == name));
            if mutual && other.as_str() < name.as_str() {
                continue;
            }
            if obj.get(other).is_some_and(is_set) {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Conflicting attributes '{}' and '{}'",
                        name, other
                    ))
                    .with_detail("Only one of these attributes may be set")
                    .with_attribute(name.as_str()),
                );
            }
        }
    }
    diagnostics
}

/// Validate a JSON value against a schema, returning the diagnostics as an error.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn check_required(
    schema: &Schema,
    obj: &serde_json::Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr) in &schema.attributes {
        if attr.flags.required && obj.get(name).is_none_or(Value::is_null) {
            diagnostics.push(
                Diagnostic::error(format!("Missing required attribute '{}'", name))
                    .with_detail("This attribute is required and must be provided")
                    .with_attribute(name.as_str()),
            );
        }
    }
}

fn validate_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            let Some(items) = value.as_array() else {
                let expected = if attr_type.is_set() { "set" } else { "list" };
                diagnostics.push(type_error(path, expected, value));
                return;
            };
            for (i, item) in items.iter().enumerate() {
                validate_type(element_type, item, &format!("{}.{}", path, i), diagnostics);
            }
            if attr_type.is_set() {
                if let Some((i, _)) = items
                    .iter()
                    .enumerate()
                    .find(|(i, item)| items[..*i].contains(item))
                {
                    diagnostics.push(
                        Diagnostic::error(format!("Duplicate element in set '{}'", path))
                            .with_detail(format!("Element {} repeats an earlier element", i))
                            .with_attribute(path),
                    );
                }
            }
        },
    }
}

fn validate_allowed(attr: &Attribute, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if attr.allowed_values.is_empty() {
        return;
    }
    if let Some(s) = value.as_str() {
        if !attr.allowed_values.iter().any(|allowed| allowed == s) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(format!(
                        "Expected one of {}, got {:?}",
                        attr.allowed_values.join(", "),
                        s
                    ))
                    .with_attribute(path),
            );
        }
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
