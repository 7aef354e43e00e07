// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider configurations keyed by provider kind.
    ///
    /// ```yaml
    /// providers:
    ///   openrouter:
    ///     api_key_env: OPENROUTER_API_KEY
    ///     model:
    ///       id: anthropic/claude-sonnet-4
    ///   github-copilot:
    ///     oauth:
    ///       access_token: gho_xxx
    ///       refresh_token: ghr_xxx
    ///       expires_at: 1767225600
    ///     model:
    ///       id: gpt-4o
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Configured agents.  The first entry is the default unless
    /// `default_agent` names another one.
    #[serde(default)]
    pub agents: Vec<AgentSettings>,
    #[serde(default)]
    pub default_agent: Option<String>,
    /// External MCP tool servers.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Resolve the agent selected by `name`, falling back to `default_agent`
    /// and then to the first configured agent.
    pub fn agent(&self, name: Option<&str>) -> Option<&AgentSettings> {
        if let Some(n) = name {
            return self.agents.iter().find(|a| a.id == n || a.name == n);
        }
        if let Some(d) = &self.default_agent {
            if let Some(a) = self.agents.iter().find(|a| &a.id == d) {
                return Some(a);
            }
        }
        self.agents.first()
    }
}

/// Configuration for one model provider.
///
/// Exactly one auth material (api key or OAuth credentials) must be
/// populated for a usable config; providers that need no auth (echo, local
/// servers) may leave both empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// OAuth credentials for providers using token auth (github-copilot).
    pub oauth: Option<OAuthConfig>,
    /// Base URL override.  The driver registry supplies the default.
    pub api_url: Option<String>,
    /// Active model for this provider.
    #[serde(default)]
    pub model: ModelDescriptor,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl ProviderConfig {
    /// True when both an API key and OAuth material are configured.
    /// Such a config is ambiguous and rejected at provider construction.
    pub fn has_ambiguous_auth(&self) -> bool {
        (self.api_key.is_some() || self.api_key_env.is_some()) && self.oauth.is_some()
    }
}

/// OAuth credential triple with the refresh endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix epoch seconds after which `access_token` is stale.
    pub expires_at: i64,
    /// Token endpoint for the refresh grant.  The driver registry supplies
    /// a default per provider kind when unset.
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model id forwarded to the provider API.
    pub id: String,
    /// Maximum output tokens to request per completion.
    pub max_tokens: Option<u32>,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            id: "gpt-4o".into(),
            max_tokens: Some(4096),
        }
    }
}

/// Per-agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: AgentKind,
    /// Key into `Config::providers` (local agents).
    pub provider: Option<String>,
    /// Endpoint URL (remote agents).
    pub url: Option<String>,
    /// Bearer token for remote agents.
    pub auth_token: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Enabled tool ids.  An empty set means the agent runs without tools
    /// and no tool schemas are sent to the provider.
    #[serde(default)]
    pub tools: Vec<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Local,
    Remote,
}

/// One external MCP tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    #[serde(default)]
    pub transport: McpTransportKind,
    /// Executable for stdio servers.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint for streamable-HTTP servers.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Built-in tool ids offered to agents.  The agent's own tool set is
    /// intersected with this list.
    #[serde(default = "ToolsConfig::default_allow")]
    pub allow: Vec<String>,
    /// bash execution timeout.  Clamped to 600 s at execution time.
    #[serde(default = "ToolsConfig::default_bash_timeout")]
    pub bash_timeout_secs: u64,
    /// Byte budget for bash output returned to the model; oversized output
    /// is trimmed in the middle, biased towards the tail.
    #[serde(default = "ToolsConfig::default_bash_output_bytes")]
    pub bash_max_output_bytes: usize,
    /// Shell patterns the bash tool refuses outright.
    #[serde(default = "ToolsConfig::default_deny")]
    pub deny_patterns: Vec<String>,
    /// Session working directory for filesystem and shell tools.
    pub workdir: Option<String>,
}

impl ToolsConfig {
    fn default_allow() -> Vec<String> {
        [
            "bash",
            "file_read",
            "file_new",
            "file_edit",
            "web_fetch",
            "web_search",
            "todo_read",
            "todo_write",
            "calculator",
            "time",
            "random",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn default_bash_timeout() -> u64 {
        120
    }

    fn default_bash_output_bytes() -> usize {
        16 * 1024
    }

    fn default_deny() -> Vec<String> {
        [
            "rm -rf /*",
            "rm -rf /",
            "mkfs*",
            "dd if=* of=/dev/*",
            ":(){*",
            "shutdown*",
            "reboot*",
            "halt*",
            "> /dev/sd*",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: Self::default_allow(),
            bash_timeout_secs: Self::default_bash_timeout(),
            bash_max_output_bytes: Self::default_bash_output_bytes(),
            deny_patterns: Self::default_deny(),
            workdir: None,
        }
    }
}

/// Orchestrator runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum model ↔ tool rounds per user turn.
    #[serde(default = "RuntimeConfig::default_max_rounds")]
    pub max_tool_rounds: u32,
    /// Per-request provider timeout.
    #[serde(default = "RuntimeConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Retry attempts for transient upstream / rate-limit failures.
    #[serde(default = "RuntimeConfig::default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "RuntimeConfig::default_retry_base")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "RuntimeConfig::default_retry_max")]
    pub retry_max_delay_ms: u64,
    /// Per-tool timeout (bash has its own, larger bound).
    #[serde(default = "RuntimeConfig::default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// MCP initialize handshake timeout.
    #[serde(default = "RuntimeConfig::default_handshake_timeout")]
    pub mcp_handshake_timeout_secs: u64,
}

impl RuntimeConfig {
    fn default_max_rounds() -> u32 {
        8
    }
    fn default_request_timeout() -> u64 {
        120
    }
    fn default_retry_attempts() -> u32 {
        3
    }
    fn default_retry_base() -> u64 {
        1000
    }
    fn default_retry_max() -> u64 {
        5000
    }
    fn default_tool_timeout() -> u64 {
        120
    }
    fn default_handshake_timeout() -> u64 {
        30
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: Self::default_max_rounds(),
            request_timeout_secs: Self::default_request_timeout(),
            retry_attempts: Self::default_retry_attempts(),
            retry_base_delay_ms: Self::default_retry_base(),
            retry_max_delay_ms: Self::default_retry_max(),
            tool_timeout_secs: Self::default_tool_timeout(),
            mcp_handshake_timeout_secs: Self::default_handshake_timeout(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
