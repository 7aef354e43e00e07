// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod auth;
pub mod registry;
mod anthropic;
mod echo;
mod error;
mod openai_compat;
mod provider;
mod stream;
mod types;

pub use anthropic::AnthropicDriver;
pub use echo::{EchoProvider, Script, ScriptedProvider};
pub use error::{ProviderError, ProviderResult};
pub use provider::{collect_stream, DeltaSink, Provider, ResponseStream};
pub use registry::{get_driver, list_drivers, DriverMeta};
pub use stream::StreamCollector;
pub use types::*;

use std::sync::Arc;

use anyhow::bail;

use auth::{Auth, CredentialsSink, HttpRefresher, TokenManager};
use freja_config::ProviderConfig;
use openai_compat::OpenAICompatDriver;

/// Construct a [`Provider`] from configuration.
///
/// Selects the driver implementation by provider `kind`.  Run
/// `freja list-providers` to see all recognised kinds.  `sink` receives
/// refreshed OAuth credentials for persistence; pass
/// [`auth::discard_credentials`] when persistence is handled elsewhere.
pub fn from_config(
    kind: &str,
    cfg: &ProviderConfig,
    request_timeout_secs: u64,
    sink: CredentialsSink,
) -> anyhow::Result<Arc<dyn Provider>> {
    let Some(meta) = get_driver(kind) else {
        let known: Vec<&str> = registry::known_driver_ids().collect();
        bail!(
            "unknown model provider: {kind:?}\n\
             Run `freja list-providers` for a full list, or check your config.\n\
             Known providers: {}",
            known.join(", ")
        );
    };

    let auth = resolve_auth(kind, cfg, meta, sink)?;
    let base_url = cfg
        .api_url
        .clone()
        .or_else(|| meta.default_base_url.map(str::to_string));
    let model = cfg.model.id.clone();
    let max_tokens = cfg.model.max_tokens;

    match kind {
        "anthropic" => Ok(Arc::new(AnthropicDriver::new(
            model,
            auth,
            base_url,
            max_tokens,
            cfg.temperature,
            cfg.top_p,
            request_timeout_secs,
        ))),
        "echo" => Ok(Arc::new(EchoProvider)),
        _ => {
            let Some(base) = base_url else {
                bail!("provider {kind:?} requires api_url in config");
            };
            let extra_headers = if kind == "openrouter" {
                vec![
                    ("HTTP-Referer".into(), "https://github.com/frejai/freja".into()),
                    ("X-Title".into(), "freja".into()),
                ]
            } else if kind == "github-copilot" {
                vec![("Copilot-Integration-Id".into(), "vscode-chat".into())]
            } else {
                vec![]
            };
            Ok(Arc::new(OpenAICompatDriver::new(
                meta.id,
                model,
                auth,
                &base,
                max_tokens,
                cfg.temperature,
                cfg.top_p,
                request_timeout_secs,
                extra_headers,
            )))
        }
    }
}

/// Resolve the auth material for a provider config.
///
/// Exactly one material may be populated.  API keys are read from config,
/// then from the configured env var, then from the driver's default env var.
fn resolve_auth(
    kind: &str,
    cfg: &ProviderConfig,
    meta: &DriverMeta,
    sink: CredentialsSink,
) -> anyhow::Result<Auth> {
    if cfg.has_ambiguous_auth() {
        bail!("provider {kind:?} has both an API key and OAuth credentials configured; keep exactly one");
    }

    if let Some(oauth) = &cfg.oauth {
        let token_url = oauth
            .token_url
            .clone()
            .or_else(|| meta.default_token_url.map(str::to_string))
            .ok_or_else(|| {
                anyhow::anyhow!("provider {kind:?} uses OAuth but no token_url is configured")
            })?;
        let manager = TokenManager::new(
            kind,
            oauth.clone(),
            Box::new(HttpRefresher::new(token_url)),
            sink,
        );
        return Ok(Auth::OAuth(Arc::new(manager)));
    }

    if let Some(key) = resolve_api_key(cfg, meta) {
        return Ok(Auth::ApiKey(key));
    }

    if meta.requires_auth {
        let hint = meta
            .default_api_key_env
            .map(|e| format!(" (set {e} or configure api_key)"))
            .unwrap_or_default();
        bail!("provider {kind:?} has no API key or OAuth credentials configured{hint}");
    }
    Ok(Auth::None)
}

fn resolve_api_key(cfg: &ProviderConfig, meta: &DriverMeta) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    if let Some(env) = meta.default_api_key_env {
        return std::env::var(env).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::discard_credentials;
    use freja_config::{ModelDescriptor, OAuthConfig};

    fn cfg_with_key(key: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: Some(key.into()),
            model: ModelDescriptor { id: "test-model".into(), max_tokens: Some(1024) },
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn from_config_openrouter_succeeds_with_key() {
        let p = from_config("openrouter", &cfg_with_key("sk-or"), 120, discard_credentials());
        assert!(p.is_ok());
        assert_eq!(p.unwrap().name(), "openrouter");
    }

    #[test]
    fn from_config_anthropic_succeeds_with_key() {
        let p = from_config("anthropic", &cfg_with_key("sk-ant"), 120, discard_credentials());
        assert_eq!(p.unwrap().name(), "anthropic");
    }

    #[test]
    fn from_config_echo_needs_no_auth() {
        let p = from_config("echo", &ProviderConfig::default(), 120, discard_credentials());
        assert_eq!(p.unwrap().name(), "echo");
    }

    #[test]
    fn from_config_unknown_provider_returns_error() {
        let err = from_config(
            "totally_unknown_provider_xyz",
            &ProviderConfig::default(),
            120,
            discard_credentials(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown model provider"));
    }

    #[test]
    fn from_config_missing_key_is_configuration_error() {
        let cfg = ProviderConfig {
            // Point at an env var that does not exist so the fallback fails too.
            api_key_env: Some("FREJA_TEST_NO_SUCH_KEY_VAR".into()),
            ..ProviderConfig::default()
        };
        let err = from_config("moonshot", &cfg, 120, discard_credentials()).unwrap_err();
        assert!(err.to_string().contains("no API key"));
    }

    #[test]
    fn from_config_ambiguous_auth_rejected() {
        let cfg = ProviderConfig {
            api_key: Some("sk-x".into()),
            oauth: Some(OAuthConfig {
                access_token: "a".into(),
                refresh_token: "r".into(),
                expires_at: 0,
                token_url: Some("https://example.com/token".into()),
            }),
            ..ProviderConfig::default()
        };
        let err = from_config("openrouter", &cfg, 120, discard_credentials()).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn from_config_copilot_oauth_uses_default_token_url() {
        let cfg = ProviderConfig {
            oauth: Some(OAuthConfig {
                access_token: "gho".into(),
                refresh_token: "ghr".into(),
                expires_at: 0,
                token_url: None,
            }),
            model: ModelDescriptor { id: "gpt-4o".into(), max_tokens: None },
            ..ProviderConfig::default()
        };
        let p = from_config("github-copilot", &cfg, 120, discard_credentials());
        assert!(p.is_ok(), "{:?}", p.err());
    }

    #[test]
    fn resolve_api_key_prefers_explicit_key() {
        let meta = get_driver("openai").unwrap();
        let cfg = ProviderConfig {
            api_key: Some("explicit-key".into()),
            api_key_env: Some("NONEXISTENT_ENV_VAR_XYZ".into()),
            ..ProviderConfig::default()
        };
        assert_eq!(resolve_api_key(&cfg, meta).as_deref(), Some("explicit-key"));
    }

    #[test]
    fn all_registry_drivers_have_constructors() {
        // Every driver id in the registry must be handled by from_config
        // without returning "unknown provider" (auth errors are OK).
        for meta in list_drivers() {
            let result = from_config(meta.id, &cfg_with_key("k"), 120, discard_credentials());
            if let Err(e) = result {
                assert!(
                    !e.to_string().contains("unknown model provider"),
                    "driver {} is in registry but not handled by from_config: {e}",
                    meta.id
                );
            }
        }
    }
}
