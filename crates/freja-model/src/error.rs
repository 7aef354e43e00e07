// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider-level error taxonomy.
///
/// Adapters map HTTP status codes into these kinds; the orchestrator decides
/// retry policy from [`ProviderError::is_retryable`] and surfaces the kind to
/// the UI at the turn boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Missing API key, unknown provider, bad request construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credentials rejected after a refresh attempt (HTTP 401).
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// HTTP 403 — never retried.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// HTTP 429.  The orchestrator may back off and retry.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// HTTP 5xx or an interrupted stream.  Retryable with backoff.
    #[error("upstream unavailable: {0}")]
    TransientUpstream(String),

    /// Network-level failure before a status was received.  Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The provider violated the wire contract (unparseable body, truncated
    /// response with no output).
    #[error("model protocol error: {0}")]
    ModelProtocol(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Map a non-success HTTP status to an error kind.
    ///
    /// 401 is mapped to `Authentication` here — the refresh-and-retry-once
    /// dance happens in the transport layer *before* this mapping, so by the
    /// time a 401 reaches the caller the refresh already failed or was not
    /// possible.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let detail = format!("{provider} returned {status}: {body}");
        match status {
            401 => Self::Authentication(detail),
            403 => Self::PermissionDenied(detail),
            429 => Self::RateLimited(detail),
            s if s >= 500 => Self::TransientUpstream(detail),
            _ => Self::ModelProtocol(detail),
        }
    }

    /// True for errors the orchestrator retries with exponential backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::TransientUpstream(_) | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_maps_to_authentication() {
        let e = ProviderError::from_status("openai", 401, "bad key");
        assert!(matches!(e, ProviderError::Authentication(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn status_403_maps_to_permission_denied_and_is_not_retryable() {
        let e = ProviderError::from_status("zai", 403, "forbidden");
        assert!(matches!(e, ProviderError::PermissionDenied(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn status_429_is_retryable() {
        let e = ProviderError::from_status("openrouter", 429, "slow down");
        assert!(matches!(e, ProviderError::RateLimited(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn status_500_and_503_are_transient() {
        for s in [500, 502, 503] {
            let e = ProviderError::from_status("moonshot", s, "");
            assert!(matches!(e, ProviderError::TransientUpstream(_)), "status {s}");
            assert!(e.is_retryable());
        }
    }

    #[test]
    fn status_400_is_model_protocol() {
        let e = ProviderError::from_status("anthropic", 400, "invalid request");
        assert!(matches!(e, ProviderError::ModelProtocol(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn error_message_carries_provider_and_status() {
        let e = ProviderError::from_status("deepinfra", 502, "bad gateway");
        let msg = e.to_string();
        assert!(msg.contains("deepinfra"));
        assert!(msg.contains("502"));
    }
}
