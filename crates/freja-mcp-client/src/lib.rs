// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod client;
mod http;
mod manager;
mod protocol;
mod proxy;
mod stdio;
mod transport;

pub use client::{McpClient, McpStatus, McpToolInfo, McpToolResult};
pub use http::StreamableHttpTransport;
pub use manager::McpManager;
pub use protocol::{Incoming, McpError, RpcError, METHOD_NOT_FOUND};
pub use proxy::McpProxyTool;
pub use stdio::StdioTransport;
pub use transport::McpTransport;
