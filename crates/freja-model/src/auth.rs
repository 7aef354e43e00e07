// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider authentication: API keys and refreshable OAuth tokens.
//!
//! OAuth refresh is single-flight per provider config: concurrent requests
//! that all hit a 401 share one refresh, and refreshed credentials are
//! persisted through the injected sink *before* the new access token is
//! published to callers.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use freja_config::OAuthConfig;

use crate::error::{ProviderError, ProviderResult};

/// Callback that persists refreshed credentials for a provider kind.
pub type CredentialsSink = Arc<dyn Fn(&str, &OAuthConfig) -> anyhow::Result<()> + Send + Sync>;

/// A no-op sink for providers whose credentials are not persisted.
pub fn discard_credentials() -> CredentialsSink {
    Arc::new(|_, _| Ok(()))
}

/// Exchanges a refresh token for a fresh credential triple.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<OAuthConfig>;
}

/// Standard OAuth2 refresh-grant flow against a token endpoint.
pub struct HttpRefresher {
    token_url: String,
    client: reqwest::Client,
}

impl HttpRefresher {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<OAuthConfig> {
        let resp = self
            .client
            .post(&self.token_url)
            .header("accept", "application/json")
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(format!(
                "token refresh failed with {status}: {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Authentication(format!("token response unreadable: {e}")))?;

        let access = body["access_token"].as_str().unwrap_or_default();
        if access.is_empty() {
            return Err(ProviderError::Authentication(
                "token response missing access_token".into(),
            ));
        }
        let refresh = body["refresh_token"]
            .as_str()
            .unwrap_or(refresh_token)
            .to_string();
        let expires_at = chrono::Utc::now().timestamp()
            + body["expires_in"].as_i64().unwrap_or(3600);

        Ok(OAuthConfig {
            access_token: access.to_string(),
            refresh_token: refresh,
            expires_at,
            token_url: Some(self.token_url.clone()),
        })
    }
}

/// Holds the current OAuth credentials for one provider config.
pub struct TokenManager {
    provider_kind: String,
    tokens: RwLock<OAuthConfig>,
    /// Single-flight gate: only one refresh may run per config.
    refresh_gate: tokio::sync::Mutex<()>,
    refresher: Box<dyn TokenRefresher>,
    sink: CredentialsSink,
}

impl TokenManager {
    pub fn new(
        provider_kind: impl Into<String>,
        initial: OAuthConfig,
        refresher: Box<dyn TokenRefresher>,
        sink: CredentialsSink,
    ) -> Self {
        Self {
            provider_kind: provider_kind.into(),
            tokens: RwLock::new(initial),
            refresh_gate: tokio::sync::Mutex::new(()),
            refresher,
            sink,
        }
    }

    /// The current access token.
    pub fn access_token(&self) -> String {
        self.tokens.read().expect("token lock poisoned").access_token.clone()
    }

    /// Refresh after the upstream rejected `stale_token` with a 401.
    ///
    /// Serialized per config: callers that lose the race observe that the
    /// stored token already differs from their stale one and reuse it without
    /// a second refresh.  The refreshed triple is persisted before it is
    /// returned, so it is never used for a request until it is durable.
    pub async fn refresh_after_unauthorized(&self, stale_token: &str) -> ProviderResult<String> {
        let _gate = self.refresh_gate.lock().await;

        {
            let current = self.tokens.read().expect("token lock poisoned");
            if current.access_token != stale_token {
                debug!(provider = %self.provider_kind, "token already refreshed by a concurrent request");
                return Ok(current.access_token.clone());
            }
        }

        let refresh_token = self
            .tokens
            .read()
            .expect("token lock poisoned")
            .refresh_token
            .clone();

        debug!(provider = %self.provider_kind, "refreshing OAuth credentials");
        let fresh = self.refresher.refresh(&refresh_token).await?;

        if let Err(e) = (self.sink)(&self.provider_kind, &fresh) {
            warn!(provider = %self.provider_kind, error = %e, "failed to persist refreshed credentials");
            return Err(ProviderError::Authentication(format!(
                "refreshed credentials could not be persisted: {e}"
            )));
        }

        let access = fresh.access_token.clone();
        *self.tokens.write().expect("token lock poisoned") = fresh;
        Ok(access)
    }
}

/// Auth material attached to provider requests.
#[derive(Clone)]
pub enum Auth {
    /// No authentication (echo, local servers).
    None,
    ApiKey(String),
    OAuth(Arc<TokenManager>),
}

impl Auth {
    /// The credential string to attach to the next request, if any.
    pub fn credential(&self) -> Option<String> {
        match self {
            Auth::None => None,
            Auth::ApiKey(k) => Some(k.clone()),
            Auth::OAuth(mgr) => Some(mgr.access_token()),
        }
    }
}

/// Send a request built by `build`, running the 401-refresh-retry dance for
/// OAuth configs: refresh and retry exactly once per request; a second 401
/// surfaces as an authentication failure.
///
/// `build` receives the credential and decides how to attach it (bearer
/// header, `x-api-key`, …), so every driver shares this path.
pub async fn send_authorized<F>(
    provider: &str,
    auth: &Auth,
    build: F,
) -> ProviderResult<reqwest::Response>
where
    F: Fn(Option<&str>) -> reqwest::RequestBuilder,
{
    let credential = auth.credential();
    let resp = build(credential.as_deref()).send().await?;

    if resp.status().as_u16() == 401 {
        if let (Auth::OAuth(mgr), Some(stale)) = (auth, credential.as_deref()) {
            debug!(provider, "401 with refreshable credentials; refreshing and retrying once");
            let fresh = mgr.refresh_after_unauthorized(stale).await?;
            let retry = build(Some(&fresh)).send().await?;
            return check_response(provider, retry).await;
        }
    }

    check_response(provider, resp).await
}

/// Map a non-success response into the error taxonomy.
pub async fn check_response(
    provider: &str,
    resp: reqwest::Response,
) -> ProviderResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::from_status(provider, status.as_u16(), &body))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct FakeRefresher {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str) -> ProviderResult<OAuthConfig> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(ProviderError::Authentication("refresh rejected".into()));
            }
            Ok(OAuthConfig {
                access_token: format!("access-{n}"),
                refresh_token: format!("{refresh_token}-next"),
                expires_at: 9_999_999_999,
                token_url: None,
            })
        }
    }

    fn initial_tokens() -> OAuthConfig {
        OAuthConfig {
            access_token: "stale".into(),
            refresh_token: "refresh-0".into(),
            expires_at: 0,
            token_url: None,
        }
    }

    fn recording_sink() -> (CredentialsSink, Arc<Mutex<Vec<(String, OAuthConfig)>>>) {
        let saved: Arc<Mutex<Vec<(String, OAuthConfig)>>> = Arc::new(Mutex::new(Vec::new()));
        let saved2 = Arc::clone(&saved);
        let sink: CredentialsSink = Arc::new(move |kind, creds| {
            saved2.lock().unwrap().push((kind.to_string(), creds.clone()));
            Ok(())
        });
        (sink, saved)
    }

    #[tokio::test]
    async fn refresh_persists_before_publishing() {
        let calls = Arc::new(AtomicU32::new(0));
        let (sink, saved) = recording_sink();
        let mgr = TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls: Arc::clone(&calls), fail: false }),
            sink,
        );

        let token = mgr.refresh_after_unauthorized("stale").await.unwrap();
        assert_eq!(token, "access-1");
        assert_eq!(mgr.access_token(), "access-1");

        let saved = saved.lock().unwrap();
        assert_eq!(saved.len(), 1, "sink must be invoked exactly once");
        assert_eq!(saved[0].0, "github-copilot");
        assert_eq!(saved[0].1.access_token, "access-1");
        assert_eq!(saved[0].1.refresh_token, "refresh-0-next");
    }

    #[tokio::test]
    async fn concurrent_refreshes_are_single_flight() {
        let calls = Arc::new(AtomicU32::new(0));
        let (sink, _saved) = recording_sink();
        let mgr = Arc::new(TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls: Arc::clone(&calls), fail: false }),
            sink,
        ));

        let a = {
            let m = Arc::clone(&mgr);
            tokio::spawn(async move { m.refresh_after_unauthorized("stale").await })
        };
        let b = {
            let m = Arc::clone(&mgr);
            tokio::spawn(async move { m.refresh_after_unauthorized("stale").await })
        };

        let ta = a.await.unwrap().unwrap();
        let tb = b.await.unwrap().unwrap();
        assert_eq!(ta, tb, "both callers must see the same refreshed token");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "only one refresh may run");
    }

    #[tokio::test]
    async fn second_refresh_with_new_stale_token_refreshes_again() {
        let calls = Arc::new(AtomicU32::new(0));
        let (sink, _saved) = recording_sink();
        let mgr = TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls: Arc::clone(&calls), fail: false }),
            sink,
        );

        let t1 = mgr.refresh_after_unauthorized("stale").await.unwrap();
        let t2 = mgr.refresh_after_unauthorized(&t1).await.unwrap();
        assert_ne!(t1, t2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_authentication_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let (sink, saved) = recording_sink();
        let mgr = TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls, fail: true }),
            sink,
        );

        let err = mgr.refresh_after_unauthorized("stale").await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert!(saved.lock().unwrap().is_empty(), "nothing persisted on failure");
        assert_eq!(mgr.access_token(), "stale", "stale token must remain unchanged");
    }

    #[tokio::test]
    async fn failed_persist_fails_the_refresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let sink: CredentialsSink = Arc::new(|_, _| anyhow::bail!("disk full"));
        let mgr = TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls, fail: false }),
            sink,
        );

        let err = mgr.refresh_after_unauthorized("stale").await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert_eq!(
            mgr.access_token(),
            "stale",
            "unpersisted token must never be published"
        );
    }

    #[test]
    fn api_key_auth_yields_credential() {
        let auth = Auth::ApiKey("sk-test".into());
        assert_eq!(auth.credential().as_deref(), Some("sk-test"));
    }

    #[test]
    fn none_auth_yields_no_credential() {
        assert!(Auth::None.credential().is_none());
    }

    // ── 401 → refresh → retry, end to end over HTTP ───────────────────────────

    /// Minimal scripted HTTP/1.1 server: each accepted connection gets the
    /// next canned response and is closed.  Request heads are recorded so the
    /// test can inspect the Authorization header of every attempt.
    async fn scripted_http_server(
        responses: Vec<String>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);

        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            while let Ok((mut conn, _)) = listener.accept().await {
                let Some(response) = responses.next() else { break };
                let mut buf = vec![0u8; 8192];
                let mut head = String::new();
                // Read until the header/body separator; the test bodies are
                // small enough to arrive in one read alongside the head.
                loop {
                    let n = conn.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    head.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if head.contains("\r\n\r\n") {
                        break;
                    }
                }
                seen2.lock().unwrap().push(head);
                let _ = conn.write_all(response.as_bytes()).await;
                let _ = conn.shutdown().await;
            }
        });

        (format!("http://{addr}/v1/chat/completions"), seen)
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn unauthorized_then_refresh_then_retry_succeeds() {
        let (url, seen) = scripted_http_server(vec![
            http_response("401 Unauthorized", r#"{"error":"expired"}"#),
            http_response("200 OK", r#"{"ok":true}"#),
        ])
        .await;

        let calls = Arc::new(AtomicU32::new(0));
        let (sink, saved) = recording_sink();
        let mgr = Arc::new(TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls: Arc::clone(&calls), fail: false }),
            sink,
        ));
        let auth = Auth::OAuth(Arc::clone(&mgr));

        let client = reqwest::Client::new();
        let resp = send_authorized("test", &auth, |credential| {
            let mut req = client.post(&url).json(&json!({ "probe": true }));
            if let Some(token) = credential {
                req = req.bearer_auth(token);
            }
            req
        })
        .await
        .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], true);

        // Exactly one refresh, persisted before the retry left the client.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(saved.lock().unwrap().len(), 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "one failed attempt plus one retry");
        assert!(seen[0].contains("Bearer stale") || seen[0].contains("bearer stale"),
            "first attempt used the stale token:\n{}", seen[0]);
        assert!(seen[1].contains("access-1"),
            "retry must carry the refreshed token:\n{}", seen[1]);
    }

    #[tokio::test]
    async fn second_unauthorized_after_refresh_fails_authentication() {
        let (url, _seen) = scripted_http_server(vec![
            http_response("401 Unauthorized", "{}"),
            http_response("401 Unauthorized", "{}"),
        ])
        .await;

        let calls = Arc::new(AtomicU32::new(0));
        let (sink, _saved) = recording_sink();
        let mgr = Arc::new(TokenManager::new(
            "github-copilot",
            initial_tokens(),
            Box::new(FakeRefresher { calls, fail: false }),
            sink,
        ));
        let auth = Auth::OAuth(mgr);

        let client = reqwest::Client::new();
        let err = send_authorized("test", &auth, |credential| {
            let mut req = client.post(&url).json(&json!({}));
            if let Some(token) = credential {
                req = req.bearer_auth(token);
            }
            req
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)), "{err:?}");
    }

    #[tokio::test]
    async fn api_key_401_is_not_retried() {
        let (url, seen) = scripted_http_server(vec![http_response("401 Unauthorized", "{}")]).await;

        let client = reqwest::Client::new();
        let err = send_authorized("test", &Auth::ApiKey("sk-bad".into()), |credential| {
            let mut req = client.post(&url).json(&json!({}));
            if let Some(token) = credential {
                req = req.bearer_auth(token);
            }
            req
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert_eq!(seen.lock().unwrap().len(), 1, "no retry without refreshable credentials");
    }
}
