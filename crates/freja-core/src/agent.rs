// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use freja_config::{AgentSettings, RuntimeConfig};
use freja_model::{
    CompletionParams, CompletionResult, FinishReason, Provider, ProviderError, ResponseEvent,
    ToolSchema,
};
use freja_tools::{ToolContext, ToolOutput, ToolRegistry};

use crate::conversation::{DeclaredToolCall, HistoryStore, StoredMessage, TurnMeta};
use crate::events::{error_kind_for, EventSink, TurnErrorKind, TurnEvent};
use crate::integration::ToolIntegration;

/// Options for one turn.
pub struct TurnOptions {
    pub events: EventSink,
    pub cancel: CancellationToken,
    /// Stream text deltas as `Chunk` events.  When false the provider is
    /// called in blocking mode and only `TurnFinal` carries text.
    pub streaming: bool,
}

impl TurnOptions {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            cancel: CancellationToken::new(),
            streaming: true,
        }
    }
}

/// How a turn ended.  Failures have already been emitted as `TurnError`
/// events by the time the caller sees them here.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(StoredMessage),
    Cancelled,
    Failed(TurnErrorKind),
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// Turns are strictly serialized per conversation; a second `send_turn`
    /// while one is active is rejected.
    #[error("conversation {0:?} already has an active turn")]
    Busy(String),
}

/// The orchestrator: drives the model ↔ tool loop for one agent.
///
/// An ordinary value constructed at the composition root — providers,
/// registry, history and event sinks all arrive by injection, so several
/// orchestrators (e.g. a scratch conversation next to the main one) can
/// coexist.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    history: Arc<dyn HistoryStore>,
    settings: AgentSettings,
    runtime: RuntimeConfig,
    integration: ToolIntegration,
    /// Conversations with a turn in flight (I2: at most one per conversation).
    active: Mutex<HashSet<String>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        history: Arc<dyn HistoryStore>,
        settings: AgentSettings,
        runtime: RuntimeConfig,
    ) -> Self {
        let integration = ToolIntegration::new(Arc::clone(&tools), runtime.tool_timeout_secs);
        Self {
            provider,
            tools,
            history,
            settings,
            runtime,
            integration,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Run one user turn against the conversation.
    ///
    /// Emits `TurnStarted`, streamed `Chunk`s, tool start/finish pairs,
    /// `RoundBoundary` between model rounds, and exactly one terminal event.
    pub async fn send_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        options: TurnOptions,
    ) -> Result<TurnOutcome, AgentError> {
        if user_text.trim().is_empty() {
            let _ = options
                .events
                .send(TurnEvent::TurnError {
                    kind: TurnErrorKind::Configuration,
                    detail: "empty user input".into(),
                })
                .await;
            return Ok(TurnOutcome::Failed(TurnErrorKind::Configuration));
        }

        let _guard = self.claim(conversation_id)?;
        let turn_id = Uuid::new_v4();
        let started = std::time::Instant::now();
        let events = options.events.clone();

        let _ = events
            .send(TurnEvent::TurnStarted {
                turn_id,
                conversation_id: conversation_id.to_string(),
            })
            .await;

        self.history
            .append(conversation_id, StoredMessage::user(user_text));

        let ctx = ToolContext {
            session_id: conversation_id.to_string(),
            user_id: String::new(),
            agent_id: self.settings.id.clone(),
            provider: self.provider.name().to_string(),
            model: self.provider.model_name().to_string(),
            workdir: None,
        };

        let mut last_text = String::new();
        let mut round = 0u32;
        loop {
            round += 1;
            if round > self.runtime.max_tool_rounds {
                let detail = if last_text.is_empty() {
                    format!("tool-call round cap ({}) exceeded", self.runtime.max_tool_rounds)
                } else {
                    format!(
                        "tool-call round cap ({}) exceeded; last assistant text: {last_text}",
                        self.runtime.max_tool_rounds
                    )
                };
                let _ = events
                    .send(TurnEvent::TurnError {
                        kind: TurnErrorKind::RoundLimitExceeded,
                        detail,
                    })
                    .await;
                return Ok(TurnOutcome::Failed(TurnErrorKind::RoundLimitExceeded));
            }

            if options.cancel.is_cancelled() {
                let _ = events.send(TurnEvent::TurnCancelled).await;
                return Ok(TurnOutcome::Cancelled);
            }

            let params = self.build_params(conversation_id);
            let result = match self.complete_with_retry(params, turn_id, &options).await {
                Ok(r) => r,
                Err(ProviderError::Cancelled) => {
                    // Partial deltas already emitted are not retracted, but
                    // partial text is never persisted.
                    let _ = events.send(TurnEvent::TurnCancelled).await;
                    return Ok(TurnOutcome::Cancelled);
                }
                Err(e) => {
                    let kind = error_kind_for(&e);
                    let _ = events
                        .send(TurnEvent::TurnError { kind, detail: e.to_string() })
                        .await;
                    return Ok(TurnOutcome::Failed(kind));
                }
            };

            if !result.text.is_empty() {
                last_text = result.text.clone();
            }

            if result.has_tool_calls() {
                self.history.append(
                    conversation_id,
                    StoredMessage::assistant_with_calls(
                        result.text.clone(),
                        result
                            .tool_calls
                            .iter()
                            .map(|tc| DeclaredToolCall {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            })
                            .collect(),
                        None,
                    ),
                );

                let outputs = self
                    .integration
                    .execute_round(&result.tool_calls, &ctx, &options.cancel, &events)
                    .await;

                for (tc, out) in result.tool_calls.iter().zip(outputs.iter()) {
                    self.history.append(
                        conversation_id,
                        StoredMessage::tool(&tc.id, &tc.name, wire_result(out), out.is_error),
                    );
                }

                let _ = events.send(TurnEvent::RoundBoundary { round }).await;
                debug!(round, tools = result.tool_calls.len(), "tool round complete");
                continue;
            }

            // finish_reason=length with no output is a protocol violation,
            // not an answer.
            if result.text.is_empty() && result.finish == FinishReason::Length {
                let _ = events
                    .send(TurnEvent::TurnError {
                        kind: TurnErrorKind::ModelProtocol,
                        detail: "model hit the output-token limit without producing output".into(),
                    })
                    .await;
                return Ok(TurnOutcome::Failed(TurnErrorKind::ModelProtocol));
            }

            let message = StoredMessage::assistant(
                result.text.clone(),
                Some(TurnMeta {
                    provider: result.provider.clone(),
                    model: result.model.clone(),
                    prompt_tokens: result.usage.prompt_tokens,
                    completion_tokens: result.usage.completion_tokens,
                    response_time_ms: started.elapsed().as_millis() as u64,
                }),
            );
            self.history.append(conversation_id, message.clone());
            let _ = events.send(TurnEvent::TurnFinal { message: message.clone() }).await;
            return Ok(TurnOutcome::Completed(message));
        }
    }

    fn build_params(&self, conversation_id: &str) -> CompletionParams {
        let snapshot = self.history.snapshot(conversation_id);
        let messages =
            crate::conversation::to_wire(&snapshot, self.settings.system_prompt.as_deref());

        // An empty tool set means the wire request omits tools entirely.
        let tools: Vec<ToolSchema> = if self.settings.tools.is_empty() {
            Vec::new()
        } else {
            self.tools
                .schemas_for(&self.settings.tools)
                .into_iter()
                .map(|s| ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        };

        CompletionParams {
            messages,
            tools,
            tool_choice: Default::default(),
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
            include_usage: true,
        }
    }

    /// One provider request with retry.  Transient upstream failures and
    /// rate limits are retried with exponential backoff and jitter; the
    /// sleep itself honours cancellation.
    async fn complete_with_retry(
        &self,
        params: CompletionParams,
        turn_id: Uuid,
        options: &TurnOptions,
    ) -> Result<CompletionResult, ProviderError> {
        let attempts = self.runtime.retry_attempts.max(1);
        for attempt in 1..=attempts {
            let result = if options.streaming {
                let (tx, mut rx) = mpsc::channel::<ResponseEvent>(64);
                let events = options.events.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        if let ResponseEvent::TextDelta(text) = ev {
                            let _ = events.send(TurnEvent::Chunk { turn_id, text }).await;
                        }
                    }
                });
                let result = self.provider.stream(params.clone(), tx, &options.cancel).await;
                // Drain before returning so no chunk trails the terminal event.
                let _ = forwarder.await;
                result
            } else {
                self.provider.generate(params.clone(), &options.cancel).await
            };

            match result {
                Ok(r) => return Ok(r),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = backoff_delay(
                        attempt,
                        self.runtime.retry_base_delay_ms,
                        self.runtime.retry_max_delay_ms,
                    );
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying provider request");
                    tokio::select! {
                        biased;
                        _ = options.cancel.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns")
    }

    fn claim(&self, conversation_id: &str) -> Result<ActiveGuard<'_>, AgentError> {
        let mut active = self.active.lock().expect("active lock poisoned");
        if !active.insert(conversation_id.to_string()) {
            return Err(AgentError::Busy(conversation_id.to_string()));
        }
        Ok(ActiveGuard {
            agent: self,
            conversation_id: conversation_id.to_string(),
        })
    }
}

/// Serialize the tool output for the follow-up request.  Successful results
/// go through as-is; failures become a structured error object the model can
/// recognise and recover from.
fn wire_result(out: &ToolOutput) -> String {
    if out.is_error {
        serde_json::json!({ "success": false, "error": out.content }).to_string()
    } else {
        out.content.clone()
    }
}

/// Exponential backoff with full jitter: the base doubles per attempt up to
/// the cap, and the actual delay is drawn from the upper half of the window
/// so retries never synchronise.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> std::time::Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let capped = exp.min(max_ms).max(1);
    let jittered = rand::thread_rng().gen_range(capped / 2..=capped);
    std::time::Duration::from_millis(jittered)
}

/// Releases the conversation's turn slot on drop, including error paths.
struct ActiveGuard<'a> {
    agent: &'a Agent,
    conversation_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.agent
            .active
            .lock()
            .expect("active lock poisoned")
            .remove(&self.conversation_id);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_respects_cap() {
        for attempt in 1..=6 {
            let d = backoff_delay(attempt, 1000, 5000);
            assert!(d.as_millis() >= 500, "attempt {attempt}: {d:?}");
            assert!(d.as_millis() <= 5000, "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn backoff_first_attempt_uses_base_window() {
        for _ in 0..20 {
            let d = backoff_delay(1, 1000, 5000);
            assert!((500..=1000).contains(&(d.as_millis() as u64)), "{d:?}");
        }
    }

    #[test]
    fn backoff_is_jittered() {
        let delays: Vec<u128> = (0..32).map(|_| backoff_delay(2, 1000, 5000).as_millis()).collect();
        let first = delays[0];
        assert!(
            delays.iter().any(|d| *d != first),
            "32 draws with identical delay strongly suggests missing jitter"
        );
    }

    #[test]
    fn wire_result_passes_success_through() {
        let out = ToolOutput::ok("t1", "plain data");
        assert_eq!(wire_result(&out), "plain data");
    }

    #[test]
    fn wire_result_wraps_errors_as_structured_object() {
        let out = ToolOutput::err("t1", "invalid arguments: boom");
        let v: serde_json::Value = serde_json::from_str(&wire_result(&out)).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "invalid arguments: boom");
    }
}
