// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{load, save_credentials, save_credentials_to, user_config_path};
pub use schema::{
    AgentKind, AgentSettings, Config, McpServerConfig, McpTransportKind, ModelDescriptor,
    OAuthConfig, ProviderConfig, RuntimeConfig, ToolsConfig,
};
