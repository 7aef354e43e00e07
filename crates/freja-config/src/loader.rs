// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::{Config, OAuthConfig};

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/freja/config.yaml"));
    paths.push(PathBuf::from("/etc/freja/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/freja/config.yaml"));
        paths.push(home.join(".config/freja/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("freja/config.yaml"));
        paths.push(cfg.join("freja/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".freja/config.yaml"));
    paths.push(PathBuf::from(".freja.yaml"));
    paths.push(PathBuf::from("freja.yaml"));

    paths
}

/// The user-level config file that credential updates are written to.
pub fn user_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".config/freja/config.yaml"))
        .unwrap_or_else(|| PathBuf::from(".freja/config.yaml"))
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_file(&mut merged, &path)?;
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_file(&mut merged, p)?;
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

fn merge_file(merged: &mut serde_yaml::Value, path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let expanded = shellexpand::env(&text).map(|c| c.into_owned()).unwrap_or(text);
    let layer: serde_yaml::Value =
        serde_yaml::from_str(&expanded).with_context(|| format!("parsing {}", path.display()))?;
    merge_yaml(merged, layer);
    Ok(())
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Persist refreshed OAuth credentials for `provider_kind` into the user
/// config layer.  Called by the token manager before a refreshed token is
/// used for further requests, so a crash between refresh and retry never
/// loses the new refresh token.
pub fn save_credentials(provider_kind: &str, creds: &OAuthConfig) -> anyhow::Result<()> {
    save_credentials_to(&user_config_path(), provider_kind, creds)
}

/// Like [`save_credentials`] but with an explicit target path (used by tests
/// and by callers that keep credentials in a non-default location).
pub fn save_credentials_to(
    path: &Path,
    provider_kind: &str,
    creds: &OAuthConfig,
) -> anyhow::Result<()> {
    let mut root: serde_yaml::Value = if path.is_file() {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    };

    let creds_value = serde_yaml::to_value(creds)?;
    let mut patch = serde_yaml::Mapping::new();
    let mut provider = serde_yaml::Mapping::new();
    let mut oauth_holder = serde_yaml::Mapping::new();
    oauth_holder.insert("oauth".into(), creds_value);
    provider.insert(provider_kind.into(), serde_yaml::Value::Mapping(oauth_holder));
    patch.insert("providers".into(), serde_yaml::Value::Mapping(provider));
    merge_yaml(&mut root, serde_yaml::Value::Mapping(patch));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_yaml::to_string(&root)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    debug!(provider = provider_kind, path = %path.display(), "persisted refreshed credentials");
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("runtime:\n  max_tool_rounds: 8\n  retry_attempts: 3");
        let src = val("runtime:\n  max_tool_rounds: 4");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["runtime"]["max_tool_rounds"].as_i64(), Some(4));
        assert_eq!(dst["runtime"]["retry_attempts"].as_i64(), Some(3));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/freja_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "runtime:\n  max_tool_rounds: 2").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.runtime.max_tool_rounds, 2);
    }

    #[test]
    fn env_vars_expanded_in_config_values() {
        use std::io::Write;
        std::env::set_var("FREJA_TEST_MODEL", "glm-4.6");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "providers:\n  zai:\n    model:\n      id: $FREJA_TEST_MODEL"
        )
        .unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.providers["zai"].model.id, "glm-4.6");
    }

    #[test]
    fn save_credentials_creates_file_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let creds = OAuthConfig {
            access_token: "new-access".into(),
            refresh_token: "new-refresh".into(),
            expires_at: 1_900_000_000,
            token_url: None,
        };
        save_credentials_to(&path, "github-copilot", &creds).unwrap();

        let cfg = load(Some(&path)).unwrap();
        let saved = cfg.providers["github-copilot"].oauth.as_ref().unwrap();
        assert_eq!(saved.access_token, "new-access");
        assert_eq!(saved.refresh_token, "new-refresh");
        assert_eq!(saved.expires_at, 1_900_000_000);
    }

    #[test]
    fn save_credentials_preserves_other_config_keys() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "runtime:\n  max_tool_rounds: 5\nproviders:\n  openrouter:\n    api_key_env: OPENROUTER_API_KEY"
        )
        .unwrap();

        let creds = OAuthConfig {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: 1,
            token_url: None,
        };
        save_credentials_to(&path, "github-copilot", &creds).unwrap();

        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.runtime.max_tool_rounds, 5);
        assert_eq!(
            cfg.providers["openrouter"].api_key_env.as_deref(),
            Some("OPENROUTER_API_KEY")
        );
        assert!(cfg.providers["github-copilot"].oauth.is_some());
    }
}
