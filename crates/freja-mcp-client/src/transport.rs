// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::McpError;

/// One MCP wire transport.
///
/// Outbound payloads go through [`send`](McpTransport::send); everything the
/// server produces comes back through the `Incoming` channel the transport
/// was constructed with, so the client runs a single dispatch loop for both
/// transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send one JSON-RPC payload (request or notification).
    async fn send(&self, payload: Value) -> Result<(), McpError>;

    /// Tear the transport down, killing any subprocess.
    async fn shutdown(&self);
}
