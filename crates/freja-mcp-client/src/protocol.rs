// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-RPC 2.0 framing for the Model Context Protocol.

use serde_json::{json, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for method-not-found.  Servers legitimately return
/// this for optional endpoints (`resources/list` on a tools-only server);
/// callers treat it as "absent", not as a failure.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC error object.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn is_method_not_found(&self) -> bool {
        self.code == METHOD_NOT_FOUND
    }
}

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server: {0}")]
    Spawn(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("initialize handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("client is not ready (status: {0})")]
    NotReady(String),
    #[error("transport closed")]
    Closed,
}

/// Build a request payload.
pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a notification payload (no id, no response expected).
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

/// One message received from the server, after classification.
#[derive(Debug)]
pub enum Incoming {
    Response {
        id: i64,
        result: Result<Value, RpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// The transport reached EOF or the child exited.
    Closed,
}

/// Classification of a raw stdout line.
#[derive(Debug)]
pub enum LineClass {
    Message(Incoming),
    /// Not a JSON object — server diagnostics, logged but not parsed.
    Diagnostic,
    /// A JSON object that is neither a response nor a notification.
    Dropped,
}

/// Classify one newline-delimited stdout line.
///
/// A line that does not start with `{` and end with `}` is diagnostic
/// output.  A `{ "jsonrpc": "2.0", … }` object with an `id` plus `result`
/// or `error` is a response; one with only a `method` is a notification.
/// Anything else is dropped.
pub fn classify_line(line: &str) -> LineClass {
    let trimmed = line.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return LineClass::Diagnostic;
    }
    let Ok(v) = serde_json::from_str::<Value>(trimmed) else {
        return LineClass::Diagnostic;
    };
    classify_value(&v)
}

/// Classify an already-parsed JSON value (used by the HTTP transport).
pub fn classify_value(v: &Value) -> LineClass {
    let id = v.get("id").and_then(|i| i.as_i64());

    if let Some(id) = id {
        if let Some(err) = v.get("error") {
            return LineClass::Message(Incoming::Response {
                id,
                result: Err(RpcError {
                    code: err["code"].as_i64().unwrap_or(-32000),
                    message: err["message"].as_str().unwrap_or("unknown error").to_string(),
                }),
            });
        }
        if let Some(result) = v.get("result") {
            return LineClass::Message(Incoming::Response {
                id,
                result: Ok(result.clone()),
            });
        }
        // An id without result or error: a request from the server.  Core
        // scope does not serve requests; drop it.
        return LineClass::Dropped;
    }

    if let Some(method) = v.get("method").and_then(|m| m.as_str()) {
        return LineClass::Message(Incoming::Notification {
            method: method.to_string(),
            params: v.get("params").cloned().unwrap_or(Value::Null),
        });
    }

    LineClass::Dropped
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
