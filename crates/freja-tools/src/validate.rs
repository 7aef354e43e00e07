// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal JSON-Schema validation for tool arguments.
//!
//! Covers the subset tool schemas actually use: `type: object` with
//! `properties`, `required`, scalar types, nested objects, and typed array
//! items.  Anything the schema does not constrain passes.  Failures are
//! plain strings so the registry can wrap them into model-visible tool
//! errors instead of runtime exceptions.

use serde_json::Value;

/// Validate `args` against a tool parameter schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    validate_value(schema, args, "arguments")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(expected) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    match expected {
        "object" => {
            let Some(obj) = value.as_object() else {
                return Err(format!("{path}: expected object, got {}", type_name(value)));
            };
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for key in required.iter().filter_map(|k| k.as_str()) {
                    if !obj.contains_key(key) {
                        return Err(format!("{path}: missing required property {key:?}"));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, prop_schema) in props {
                    if let Some(v) = obj.get(key) {
                        validate_value(prop_schema, v, &format!("{path}.{key}"))?;
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(format!("{path}: expected array, got {}", type_name(value)));
            };
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        "string" => match value.is_string() {
            true => Ok(()),
            false => Err(format!("{path}: expected string, got {}", type_name(value))),
        },
        "integer" => match value.as_i64().is_some() || value.as_u64().is_some() {
            true => Ok(()),
            false => Err(format!("{path}: expected integer, got {}", type_name(value))),
        },
        "number" => match value.is_number() {
            true => Ok(()),
            false => Err(format!("{path}: expected number, got {}", type_name(value))),
        },
        "boolean" => match value.is_boolean() {
            true => Ok(()),
            false => Err(format!("{path}: expected boolean, got {}", type_name(value))),
        },
        // "null" and unknown type names are not constrained.
        _ => Ok(()),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
