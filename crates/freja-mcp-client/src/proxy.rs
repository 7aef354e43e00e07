// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wraps a discovered MCP tool as a [`freja_tools::Tool`] so it can live in
//! the shared registry next to the built-ins.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use freja_tools::{Tool, ToolCall, ToolContext, ToolOutput};

use crate::client::{McpClient, McpToolInfo};
use crate::protocol::McpError;

pub struct McpProxyTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
}

impl McpProxyTool {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        Self { client, info }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        match self.client.call_tool(&self.info.name, call.args.clone(), cancel).await {
            Ok(result) if result.is_error => ToolOutput::err(&call.id, result.content),
            Ok(result) => ToolOutput::ok(&call.id, result.content),
            Err(McpError::Cancelled) => ToolOutput::err(&call.id, "cancelled"),
            // Server gone or handshake lost: a tool-execution error for the
            // model, not an orchestrator failure.
            Err(e) => ToolOutput::err(
                &call.id,
                format!("mcp server {} unavailable: {e}", self.client.server_id()),
            ),
        }
    }
}
