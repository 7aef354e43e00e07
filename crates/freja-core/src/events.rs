// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use freja_model::ProviderError;

use crate::conversation::StoredMessage;

/// Channel the orchestrator emits lifecycle events into.  The UI holds the
/// receiving end and renders in real time; a consumer that only watches
/// `TurnFinal` still receives a complete, well-formed assistant message.
pub type EventSink = mpsc::Sender<TurnEvent>;

/// Events emitted by the orchestrator during a single turn, in order:
/// `TurnStarted`, then text chunks and tool start/finish pairs (start always
/// before the matching finish), `RoundBoundary` between model rounds, and
/// exactly one of `TurnFinal`, `TurnError` or `TurnCancelled`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TurnStarted {
        turn_id: Uuid,
        conversation_id: String,
    },
    /// A streamed text fragment of the assistant response.
    Chunk { turn_id: Uuid, text: String },
    /// The model requested a tool call.
    ToolStarted {
        call_id: String,
        name: String,
        args: Value,
    },
    /// A tool call finished (results may complete out of order, but the
    /// start for a given call id always precedes its finish).
    ToolFinished {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// One model ↔ tool round completed; the next provider request follows.
    RoundBoundary { round: u32 },
    /// The final assistant message of the turn.
    TurnFinal { message: StoredMessage },
    TurnError { kind: TurnErrorKind, detail: String },
    TurnCancelled,
}

/// User-facing error taxonomy, surfaced at the turn boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnErrorKind {
    /// Missing API key, unknown provider, empty input, agent misconfigured.
    Configuration,
    /// Provider rejected credentials after a refresh attempt.
    Authentication,
    PermissionDenied,
    /// Transient upstream failures that survived the retry budget.
    UpstreamUnavailable,
    RateLimited,
    ModelProtocol,
    /// The model ↔ tool round cap was hit.
    RoundLimitExceeded,
}

impl std::fmt::Display for TurnErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnErrorKind::Configuration => "configuration",
            TurnErrorKind::Authentication => "authentication",
            TurnErrorKind::PermissionDenied => "permission-denied",
            TurnErrorKind::UpstreamUnavailable => "upstream-unavailable",
            TurnErrorKind::RateLimited => "rate-limited",
            TurnErrorKind::ModelProtocol => "model-protocol",
            TurnErrorKind::RoundLimitExceeded => "round-limit-exceeded",
        };
        write!(f, "{s}")
    }
}

/// Map a provider failure onto the turn-level taxonomy.
pub fn error_kind_for(e: &ProviderError) -> TurnErrorKind {
    match e {
        ProviderError::Configuration(_) => TurnErrorKind::Configuration,
        ProviderError::Authentication(_) => TurnErrorKind::Authentication,
        ProviderError::PermissionDenied(_) => TurnErrorKind::PermissionDenied,
        ProviderError::RateLimited(_) => TurnErrorKind::RateLimited,
        ProviderError::TransientUpstream(_) | ProviderError::Network(_) => {
            TurnErrorKind::UpstreamUnavailable
        }
        ProviderError::ModelProtocol(_) => TurnErrorKind::ModelProtocol,
        // Not reachable from the orchestrator: `send_turn` intercepts
        // `Cancelled` and ends the turn as `TurnCancelled` before mapping.
        // Kept as a defensive default so a future call path that skips the
        // intercept degrades to a visible turn error rather than a panic.
        ProviderError::Cancelled => TurnErrorKind::UpstreamUnavailable,
    }
}
