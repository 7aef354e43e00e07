// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP client: one per configured server.
//!
//! Owns the transport, performs the initialize handshake, discovers tools
//! and resources, and correlates concurrent in-flight requests strictly by
//! JSON-RPC id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{notification, request, Incoming, McpError, RpcError};
use crate::transport::McpTransport;

/// Lifecycle state of one MCP client.
///
/// `idle → spawning → ready → (stopping → stopped) | failed`; transport
/// close or child exit moves any state to `stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpStatus {
    Idle,
    Spawning,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for McpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            McpStatus::Idle => "idle",
            McpStatus::Spawning => "spawning",
            McpStatus::Ready => "ready",
            McpStatus::Stopping => "stopping",
            McpStatus::Stopped => "stopped",
            McpStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One tool advertised by the server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of a `tools/call`.
#[derive(Debug, Clone)]
pub struct McpToolResult {
    /// Concatenated text content blocks.
    pub content: String,
    pub is_error: bool,
}

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, RpcError>>>>>;

pub struct McpClient {
    server_id: String,
    transport: Arc<dyn McpTransport>,
    status: Arc<Mutex<McpStatus>>,
    pending: Pending,
    next_id: AtomicI64,
    tools: Mutex<Vec<McpToolInfo>>,
    resources: Mutex<Vec<Value>>,
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl McpClient {
    /// Wire a client to a transport.  `incoming` is the channel the transport
    /// pushes server messages into; the client runs the dispatch loop.
    pub fn new(
        server_id: impl Into<String>,
        transport: Arc<dyn McpTransport>,
        mut incoming: mpsc::Receiver<Incoming>,
        handshake_timeout: Duration,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            server_id: server_id.into(),
            transport,
            status: Arc::new(Mutex::new(McpStatus::Idle)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            tools: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            handshake_timeout,
            request_timeout,
        });

        let pending = Arc::clone(&client.pending);
        let status = Arc::clone(&client.status);
        let sid = client.server_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = incoming.recv().await {
                match msg {
                    Incoming::Response { id, result } => {
                        let waiter = pending.lock().expect("pending lock poisoned").remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(result);
                            }
                            None => {
                                debug!(server = %sid, id, "response for unknown or cancelled request");
                            }
                        }
                    }
                    Incoming::Notification { method, params } => match method.as_str() {
                        "notifications/message" => {
                            info!(server = %sid, "mcp log: {}", params["data"]);
                        }
                        "notifications/progress" => {
                            debug!(server = %sid, "mcp progress: {params}");
                        }
                        other => {
                            debug!(server = %sid, method = other, "unhandled mcp notification");
                        }
                    },
                    Incoming::Closed => {
                        {
                            let mut st = status.lock().expect("status lock poisoned");
                            if *st != McpStatus::Stopping {
                                warn!(server = %sid, "mcp transport closed unexpectedly");
                            }
                            *st = McpStatus::Stopped;
                        }
                        // Reject everything still in flight.
                        let waiters: Vec<_> = pending
                            .lock()
                            .expect("pending lock poisoned")
                            .drain()
                            .collect();
                        for (_, tx) in waiters {
                            let _ = tx.send(Err(RpcError {
                                code: -32000,
                                message: "transport closed".into(),
                            }));
                        }
                        break;
                    }
                }
            }
        });

        client
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn status(&self) -> McpStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    fn set_status(&self, s: McpStatus) {
        *self.status.lock().expect("status lock poisoned") = s;
    }

    /// Discovered tools (populated by [`connect`](Self::connect)).
    pub fn tools(&self) -> Vec<McpToolInfo> {
        self.tools.lock().expect("tools lock poisoned").clone()
    }

    /// Discovered resources, when the server advertises any.
    pub fn resources(&self) -> Vec<Value> {
        self.resources.lock().expect("resources lock poisoned").clone()
    }

    /// Perform the initialize handshake and discovery.
    ///
    /// Initialize failure is fatal for this client instance (status
    /// `failed`).  Method-not-found on optional discovery endpoints is
    /// recorded as absence and the client stays usable.
    pub async fn connect(&self) -> Result<(), McpError> {
        self.set_status(McpStatus::Spawning);

        let params = json!({
            "protocolVersion": "2025-03-26",
            "clientInfo": {
                "name": "freja",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {},
                "resources": { "subscribe": true },
                "prompts": {},
                "logging": {},
            },
        });

        let init = match self
            .raw_request("initialize", params, self.handshake_timeout, None)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                self.set_status(McpStatus::Failed);
                return Err(McpError::Handshake(e.to_string()));
            }
        };

        if let Err(e) = self
            .transport
            .send(notification("notifications/initialized", json!({})))
            .await
        {
            self.set_status(McpStatus::Failed);
            return Err(e);
        }
        self.set_status(McpStatus::Ready);
        info!(
            server = %self.server_id,
            name = %init["serverInfo"]["name"].as_str().unwrap_or("?"),
            "mcp server initialised"
        );

        // tools/list — absence tolerated, a tools-less server is legal.
        match self.request("tools/list", json!({}), None).await {
            Ok(v) => {
                let tools = parse_tools(&v);
                debug!(server = %self.server_id, count = tools.len(), "discovered mcp tools");
                *self.tools.lock().expect("tools lock poisoned") = tools;
            }
            Err(McpError::Rpc(e)) if e.is_method_not_found() => {
                debug!(server = %self.server_id, "server has no tools/list endpoint");
            }
            Err(e) => return Err(e),
        }

        // Resource discovery only when advertised.
        if init["capabilities"]["resources"].is_object() {
            for method in ["resources/list", "resources/templates/list"] {
                match self.request(method, json!({}), None).await {
                    Ok(v) => {
                        let key = if method == "resources/list" { "resources" } else { "resourceTemplates" };
                        if let Some(items) = v[key].as_array() {
                            self.resources
                                .lock()
                                .expect("resources lock poisoned")
                                .extend(items.iter().cloned());
                        }
                    }
                    Err(McpError::Rpc(e)) if e.is_method_not_found() => {
                        debug!(server = %self.server_id, method, "optional endpoint absent");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    /// Execute a remote tool.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<McpToolResult, McpError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": args }),
                Some(cancel),
            )
            .await?;

        let content = result["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| match b["type"].as_str() {
                        Some("text") => b["text"].as_str(),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        Ok(McpToolResult {
            content,
            is_error: result["isError"].as_bool().unwrap_or(false),
        })
    }

    /// Read one resource by URI.
    pub async fn read_resource(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, McpError> {
        self.request("resources/read", json!({ "uri": uri }), Some(cancel))
            .await
    }

    /// Send a request on a ready client.  Calls on a non-ready client fail
    /// synchronously.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, McpError> {
        let status = self.status();
        if status != McpStatus::Ready {
            return Err(McpError::NotReady(status.to_string()));
        }
        self.raw_request(method, params, self.request_timeout, cancel).await
    }

    async fn raw_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        if let Err(e) = self.transport.send(request(id, method, params)).await {
            self.pending.lock().expect("pending lock poisoned").remove(&id);
            return Err(e);
        }

        let cancelled = async {
            match cancel {
                Some(c) => c.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                // Best-effort: tell the server to abandon the work.
                let _ = self
                    .transport
                    .send(notification("notifications/cancelled", json!({ "requestId": id })))
                    .await;
                Err(McpError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                Err(McpError::Timeout)
            }
            outcome = rx => match outcome {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(rpc)) => Err(McpError::Rpc(rpc)),
                Err(_) => Err(McpError::Closed),
            }
        }
    }

    /// Stop the client and its transport.
    pub async fn close(&self) {
        self.set_status(McpStatus::Stopping);
        self.transport.shutdown().await;
        self.set_status(McpStatus::Stopped);
    }
}

fn parse_tools(v: &Value) -> Vec<McpToolInfo> {
    v["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    let name = t["name"].as_str()?.to_string();
                    Some(McpToolInfo {
                        name,
                        description: t["description"].as_str().unwrap_or("").to_string(),
                        input_schema: t
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or_else(|| json!({ "type": "object" })),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
