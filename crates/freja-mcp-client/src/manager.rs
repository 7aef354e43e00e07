// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use freja_config::{McpServerConfig, McpTransportKind};
use freja_tools::{ToolOrigin, ToolRegistry};

use crate::client::McpClient;
use crate::http::StreamableHttpTransport;
use crate::protocol::McpError;
use crate::proxy::McpProxyTool;
use crate::stdio::StdioTransport;
use crate::transport::McpTransport;

/// Owns one [`McpClient`] per configured server.
#[derive(Default)]
pub struct McpManager {
    clients: HashMap<String, Arc<McpClient>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to one configured server and keep its client.
    pub async fn connect(
        &mut self,
        cfg: &McpServerConfig,
        handshake_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Result<Arc<McpClient>, McpError> {
        let (tx, rx) = mpsc::channel(64);
        let transport: Arc<dyn McpTransport> = match cfg.transport {
            McpTransportKind::Stdio => {
                let command = cfg.command.as_deref().ok_or_else(|| {
                    McpError::Spawn(format!("mcp server {:?} has no command", cfg.id))
                })?;
                Arc::new(StdioTransport::spawn(&cfg.id, command, &cfg.args, &cfg.env, tx)?)
            }
            McpTransportKind::Http => {
                let raw = cfg.url.as_deref().ok_or_else(|| {
                    McpError::Transport(format!("mcp server {:?} has no url", cfg.id))
                })?;
                let url = url::Url::parse(raw).map_err(|e| {
                    McpError::Transport(format!("mcp server {:?} url invalid: {e}", cfg.id))
                })?;
                Arc::new(StreamableHttpTransport::new(url.to_string(), tx))
            }
        };

        let client = McpClient::new(
            &cfg.id,
            transport,
            rx,
            Duration::from_secs(handshake_timeout_secs),
            Duration::from_secs(request_timeout_secs),
        );
        client.connect().await?;
        self.clients.insert(cfg.id.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Connect every configured server.  A server that fails to come up is
    /// logged and skipped; its tools simply stay unavailable until the next
    /// explicit reconnect.
    pub async fn connect_all(
        &mut self,
        configs: &[McpServerConfig],
        handshake_timeout_secs: u64,
        request_timeout_secs: u64,
    ) {
        for cfg in configs {
            match self.connect(cfg, handshake_timeout_secs, request_timeout_secs).await {
                Ok(client) => {
                    info!(server = %cfg.id, tools = client.tools().len(), "mcp server connected");
                }
                Err(e) => {
                    warn!(server = %cfg.id, error = %e, "mcp server unavailable");
                }
            }
        }
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<McpClient>> {
        self.clients.get(server_id).cloned()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<McpClient>> {
        self.clients.values()
    }

    /// Register every discovered tool into the shared registry.  Name
    /// collisions (with built-ins or other servers) reject the later
    /// registration; the registry logs the warning.
    pub fn register_tools(&self, registry: &mut ToolRegistry) {
        for (server_id, client) in &self.clients {
            for info in client.tools() {
                let proxy = McpProxyTool::new(Arc::clone(client), info);
                let _ = registry.register(Arc::new(proxy), ToolOrigin::Mcp(server_id.clone()));
            }
        }
    }

    /// Stop every client, killing stdio children.
    pub async fn shutdown_all(&mut self) {
        for (id, client) in self.clients.drain() {
            info!(server = %id, "stopping mcp server");
            client.close().await;
        }
    }
}
