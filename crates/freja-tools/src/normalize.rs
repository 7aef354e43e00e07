// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Argument normalization: un-stringify nested objects.
//!
//! Models occasionally serialise a nested object argument as a JSON string
//! (`"{\"a\":1}"` where the schema expects `{"a":1}`).  Before validation the
//! registry walks the schema and, for every property whose schema expects
//! `type: object` but whose supplied value is a string, attempts a JSON parse
//! and substitutes the parsed value on success.  The same applies recursively
//! to nested objects and to object-typed items within arrays.
//!
//! Normalization is idempotent: applying it twice yields the same value.

use serde_json::Value;

/// Normalize `args` against the tool's parameter schema.
pub fn normalize_args(schema: &Value, args: Value) -> Value {
    normalize_value(schema, args)
}

fn normalize_value(schema: &Value, value: Value) -> Value {
    let expected = schema.get("type").and_then(|t| t.as_str());

    match (expected, value) {
        (Some("object"), Value::String(s)) => {
            // A stringified object: parse and, on success, keep normalizing
            // into the parsed structure.  Parse failures leave the string
            // untouched; validation will report them.
            match serde_json::from_str::<Value>(&s) {
                Ok(parsed) if parsed.is_object() => normalize_value(schema, parsed),
                _ => Value::String(s),
            }
        }
        (Some("object"), Value::Object(mut obj)) => {
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, prop_schema) in props {
                    if let Some(v) = obj.remove(key) {
                        obj.insert(key.clone(), normalize_value(prop_schema, v));
                    }
                }
            }
            Value::Object(obj)
        }
        (Some("array"), Value::Array(items)) => {
            let item_schema = schema.get("items");
            Value::Array(
                items
                    .into_iter()
                    .map(|item| match item_schema {
                        Some(s) => normalize_value(s, item),
                        None => item,
                    })
                    .collect(),
            )
        }
        (_, v) => v,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
