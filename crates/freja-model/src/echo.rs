// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ProviderResult,
    provider::{collect_stream, DeltaSink, Provider, ResponseStream},
    CompletionParams, CompletionResult, ResponseEvent, Role,
};

/// Deterministic offline provider.  Echoes the last user message back as the
/// assistant response; useful for smoke-testing the full pipeline without
/// credentials.
#[derive(Default)]
pub struct EchoProvider;

impl EchoProvider {
    fn script(req: &CompletionParams) -> Vec<ProviderResult<ResponseEvent>> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();
        vec![
            Ok(ResponseEvent::TextDelta(format!("ECHO: {reply}"))),
            Ok(ResponseEvent::Usage { prompt_tokens: 10, completion_tokens: 10 }),
            Ok(ResponseEvent::Done),
        ]
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        params: CompletionParams,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult> {
        let events: ResponseStream = Box::pin(stream::iter(Self::script(&params)));
        collect_stream("echo", "echo", events, None, cancel).await
    }

    async fn stream(
        &self,
        params: CompletionParams,
        sink: DeltaSink,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult> {
        let events: ResponseStream = Box::pin(stream::iter(Self::script(&params)));
        collect_stream("echo", "echo", events, Some(&sink), cancel).await
    }
}

/// One scripted model round.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub events: Vec<ResponseEvent>,
    /// When set, the stream never terminates after the scripted events —
    /// used by cancellation tests to simulate a provider that keeps the
    /// connection open.
    pub hang_at_end: bool,
}

/// A pre-scripted provider.  Each completion pops the next script from the
/// front of the queue, so tests can specify exact event sequences — including
/// tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionParams>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self::from_scripts(
            scripts
                .into_iter()
                .map(|events| Script { events, hang_at_end: false })
                .collect(),
        )
    }

    pub fn from_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ResponseEvent::TextDelta(r),
            ResponseEvent::Usage { prompt_tokens: 5, completion_tokens: 5 },
            ResponseEvent::Done,
        ]])
    }

    /// Provider that returns one tool call, then a text reply on the next round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCallDelta {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Finish(crate::FinishReason::ToolCalls),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(final_text.into()),
                ResponseEvent::Finish(crate::FinishReason::Stop),
                ResponseEvent::Done,
            ],
        ])
    }

    fn next_stream(&self, params: CompletionParams) -> ResponseStream {
        *self.last_request.lock().unwrap() = Some(params);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Script {
                    events: vec![
                        ResponseEvent::TextDelta("[no more scripts]".into()),
                        ResponseEvent::Done,
                    ],
                    hang_at_end: false,
                }
            } else {
                scripts.remove(0)
            }
        };
        let events: Vec<ProviderResult<ResponseEvent>> =
            script.events.into_iter().map(Ok).collect();
        let head = stream::iter(events);
        if script.hang_at_end {
            Box::pin(head.chain(stream::pending()))
        } else {
            Box::pin(head)
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn generate(
        &self,
        params: CompletionParams,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult> {
        let events = self.next_stream(params);
        collect_stream("scripted", "scripted-model", events, None, cancel).await
    }

    async fn stream(
        &self,
        params: CompletionParams,
        sink: DeltaSink,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult> {
        let events = self.next_stream(params);
        collect_stream("scripted", "scripted-model", events, Some(&sink), cancel).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn req(text: &str) -> CompletionParams {
        CompletionParams {
            messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn echo_returns_last_user_message() {
        let p = EchoProvider;
        let cancel = CancellationToken::new();
        let r = p.generate(req("hi"), &cancel).await.unwrap();
        assert_eq!(r.text, "ECHO: hi");
        assert_eq!(r.usage.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let p = ScriptedProvider::always_text("hello world");
        let cancel = CancellationToken::new();
        let r = p.generate(req("x"), &cancel).await.unwrap();
        assert_eq!(r.text, "hello world");
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let p = ScriptedProvider::tool_then_text("call-1", "bash", r#"{"command":"ls"}"#, "done");
        let cancel = CancellationToken::new();

        let r1 = p.generate(req("x"), &cancel).await.unwrap();
        assert!(r1.has_tool_calls());
        assert_eq!(r1.tool_calls[0].name, "bash");

        let r2 = p.generate(req("x"), &cancel).await.unwrap();
        assert_eq!(r2.text, "done");
        assert!(!r2.has_tool_calls());
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let cancel = CancellationToken::new();
        let r = p.generate(req("x"), &cancel).await.unwrap();
        assert!(r.text.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedProvider::always_text("ok");
        let cancel = CancellationToken::new();
        let _ = p.generate(req("inspect me"), &cancel).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        let seen = seen.as_ref().unwrap();
        assert_eq!(seen.messages[0].as_text(), Some("inspect me"));
    }

    #[tokio::test]
    async fn hanging_script_is_cancellable() {
        let p = ScriptedProvider::from_scripts(vec![Script {
            events: vec![ResponseEvent::TextDelta("par".into())],
            hang_at_end: true,
        }]);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel2.cancel();
        });
        let err = p.generate(req("x"), &cancel).await.unwrap_err();
        assert!(matches!(err, crate::ProviderError::Cancelled));
    }
}
