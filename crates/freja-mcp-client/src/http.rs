// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streamable-HTTP MCP transport.
//!
//! Each JSON-RPC payload is POSTed to the configured endpoint with
//! `Accept: application/json, text/event-stream`.  The server answers with
//! either a single JSON body or an SSE stream of notifications followed by
//! the response.  A session id returned in the `mcp-session-id` response
//! header on the first call is echoed on all subsequent calls.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{classify_value, Incoming, LineClass, McpError, RpcError};
use crate::transport::McpTransport;

pub const SESSION_HEADER: &str = "mcp-session-id";

pub struct StreamableHttpTransport {
    url: String,
    client: reqwest::Client,
    session_id: Arc<Mutex<Option<String>>>,
    incoming: mpsc::Sender<Incoming>,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>, incoming: mpsc::Sender<Incoming>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            session_id: Arc::new(Mutex::new(None)),
            incoming,
        }
    }

    /// Session id captured from the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session lock poisoned").clone()
    }

    async fn post_and_route(
        url: String,
        client: reqwest::Client,
        session_id: Arc<Mutex<Option<String>>>,
        incoming: mpsc::Sender<Incoming>,
        payload: Value,
    ) {
        let request_id = payload.get("id").and_then(|i| i.as_i64());

        let mut req = client
            .post(&url)
            .header("accept", "application/json, text/event-stream")
            .json(&payload);
        if let Some(sid) = session_id.lock().expect("session lock poisoned").clone() {
            req = req.header(SESSION_HEADER, sid);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                Self::fail(&incoming, request_id, format!("POST failed: {e}")).await;
                return;
            }
        };

        if let Some(sid) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            session_id
                .lock()
                .expect("session lock poisoned")
                .get_or_insert_with(|| sid.to_string());
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Self::fail(&incoming, request_id, format!("server returned {status}: {body}")).await;
            return;
        }

        let is_sse = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if is_sse {
            // Read the whole SSE body and route each data line.  Streams for
            // one request are bounded: the server closes them after sending
            // the final response.
            let body = match resp.text().await {
                Ok(b) => b,
                Err(e) => {
                    Self::fail(&incoming, request_id, format!("SSE read failed: {e}")).await;
                    return;
                }
            };
            for line in body.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                        Self::route(&incoming, &v).await;
                    }
                }
            }
        } else {
            match resp.json::<Value>().await {
                Ok(v) => Self::route(&incoming, &v).await,
                Err(e) => Self::fail(&incoming, request_id, format!("unparseable body: {e}")).await,
            }
        }
    }

    async fn route(incoming: &mpsc::Sender<Incoming>, v: &Value) {
        match classify_value(v) {
            LineClass::Message(msg) => {
                let _ = incoming.send(msg).await;
            }
            LineClass::Diagnostic | LineClass::Dropped => {
                debug!("dropping unrecognised HTTP MCP message");
            }
        }
    }

    /// Resolve the caller's pending request with a transport-level failure;
    /// notifications with no id are only logged.
    async fn fail(incoming: &mpsc::Sender<Incoming>, request_id: Option<i64>, message: String) {
        warn!("mcp http transport: {message}");
        if let Some(id) = request_id {
            let _ = incoming
                .send(Incoming::Response {
                    id,
                    result: Err(RpcError { code: -32000, message }),
                })
                .await;
        }
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn send(&self, payload: Value) -> Result<(), McpError> {
        // Spawned so concurrent requests do not serialize on one POST.
        tokio::spawn(Self::post_and_route(
            self.url.clone(),
            self.client.clone(),
            Arc::clone(&self.session_id),
            self.incoming.clone(),
            payload,
        ));
        Ok(())
    }

    async fn shutdown(&self) {}
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
