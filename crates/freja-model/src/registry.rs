// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver registry: static metadata for every supported model provider.
//!
//! Single source of truth for which provider kinds exist and what their
//! defaults are.  Construction logic lives in [`crate::from_config`].

/// Metadata describing a registered model driver.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique provider kind used as the key in the `providers` config map.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description shown by `freja list-providers`.
    pub description: &'static str,
    /// Default environment variable that holds the API key.
    /// `None` for providers that need no key or use OAuth.
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when the user does not set `api_url` in config.
    pub default_base_url: Option<&'static str>,
    /// Default token endpoint for OAuth refresh grants.
    pub default_token_url: Option<&'static str>,
    /// Whether some auth material is required at all.
    pub requires_auth: bool,
}

/// Complete registry of supported drivers.
pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT and o-series models",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        default_token_url: None,
        requires_auth: true,
    },
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        default_token_url: None,
        requires_auth: true,
    },
    DriverMeta {
        id: "openrouter",
        name: "OpenRouter",
        description: "OpenRouter gateway (200+ models from many providers)",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: Some("https://openrouter.ai/api/v1"),
        default_token_url: None,
        requires_auth: true,
    },
    DriverMeta {
        id: "deepinfra",
        name: "DeepInfra",
        description: "DeepInfra hosted open models",
        default_api_key_env: Some("DEEPINFRA_API_KEY"),
        default_base_url: Some("https://api.deepinfra.com/v1/openai"),
        default_token_url: None,
        requires_auth: true,
    },
    DriverMeta {
        id: "zai",
        name: "Z.ai",
        description: "Zhipu GLM models via the Z.ai platform",
        default_api_key_env: Some("ZAI_API_KEY"),
        default_base_url: Some("https://api.z.ai/api/paas/v4"),
        default_token_url: None,
        requires_auth: true,
    },
    DriverMeta {
        id: "moonshot",
        name: "Moonshot",
        description: "Moonshot Kimi models",
        default_api_key_env: Some("MOONSHOT_API_KEY"),
        default_base_url: Some("https://api.moonshot.ai/v1"),
        default_token_url: None,
        requires_auth: true,
    },
    DriverMeta {
        id: "github-copilot",
        name: "GitHub Copilot",
        description: "GitHub Copilot chat completions (OAuth device flow credentials)",
        default_api_key_env: None,
        default_base_url: Some("https://api.githubcopilot.com"),
        default_token_url: Some("https://github.com/login/oauth/access_token"),
        requires_auth: true,
    },
    DriverMeta {
        id: "echo",
        name: "Echo",
        description: "Offline provider that echoes input (pipeline smoke tests)",
        default_api_key_env: None,
        default_base_url: None,
        default_token_url: None,
        requires_auth: false,
    },
];

pub fn get_driver(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|d| d.id == id)
}

pub fn list_drivers() -> impl Iterator<Item = &'static DriverMeta> {
    DRIVERS.iter()
}

pub fn known_driver_ids() -> impl Iterator<Item = &'static str> {
    DRIVERS.iter().map(|d| d.id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
