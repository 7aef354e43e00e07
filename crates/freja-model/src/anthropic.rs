// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic messages API driver.
//!
//! The wire shape differs from the OpenAI dialect: a separate `system`
//! parameter, `content` arrays with typed blocks, tool calls as `tool_use`
//! blocks, tool results as `tool_result` blocks inside user messages, and
//! SSE events typed by a `type` field (`content_block_start`,
//! `content_block_delta`, `message_delta`, `message_stop`).

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    auth::{send_authorized, Auth},
    error::{ProviderError, ProviderResult},
    provider::{collect_stream, DeltaSink, Provider, ResponseStream},
    CompletionParams, CompletionResult, FinishReason, Message, MessageContent, ResponseEvent,
    Role, ToolCallRequest, ToolChoice, Usage,
};

pub struct AnthropicDriver {
    model: String,
    auth: Auth,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    top_p: Option<f32>,
    request_timeout: std::time::Duration,
    client: reqwest::Client,
}

impl AnthropicDriver {
    pub fn new(
        model: String,
        auth: Auth,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        top_p: Option<f32>,
        request_timeout_secs: u64,
    ) -> Self {
        Self {
            model,
            auth,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature,
            top_p,
            request_timeout: std::time::Duration::from_secs(request_timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, params: &CompletionParams, stream: bool) -> Value {
        let (system, messages) = build_anthropic_messages(&params.messages);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": params.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(t) = params.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p.or(self.top_p) {
            body["top_p"] = json!(p);
        }

        // Empty tool set → omit tools and tool_choice entirely.
        if !params.tools.is_empty() {
            let tools: Vec<Value> = params
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = match &params.tool_choice {
                ToolChoice::Auto => json!({ "type": "auto" }),
                ToolChoice::None => json!({ "type": "none" }),
                ToolChoice::Function(name) => json!({ "type": "tool", "name": name }),
            };
        }
        body
    }

    async fn send(&self, body: &Value, blocking: bool) -> ProviderResult<reqwest::Response> {
        debug!(model = %self.model, "sending anthropic request");
        send_authorized("anthropic", &self.auth, |credential| {
            let mut req = self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("anthropic-version", "2023-06-01")
                .json(body);
            if blocking {
                req = req.timeout(self.request_timeout);
            }
            if let Some(key) = credential {
                req = req.header("x-api-key", key);
            }
            req
        })
        .await
    }
}

#[async_trait]
impl Provider for AnthropicDriver {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        params: CompletionParams,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult> {
        let body = self.build_body(&params, false);
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            r = self.send(&body, true) => r?,
        };
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::ModelProtocol(format!("unparseable response: {e}")))?;
        parse_blocking_response(&v, &self.model)
    }

    async fn stream(
        &self,
        params: CompletionParams,
        sink: DeltaSink,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionResult> {
        let body = self.build_body(&params, true);
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            r = self.send(&body, false) => r?,
        };

        let byte_stream = resp.bytes_stream();
        // Scan state: (line buffer, input tokens from message_start).  The
        // input token count arrives at stream start while output tokens come
        // with message_delta at the end, so the two are joined here before a
        // single Usage event is emitted.
        let events = byte_stream
            .scan((String::new(), 0u32), |(buf, input_tokens), chunk| {
                let mut events: Vec<ProviderResult<ResponseEvent>> = Vec::new();
                match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                    events.extend(parse_anthropic_event(&v, input_tokens));
                                }
                            }
                        }
                    }
                    Err(e) => events.push(Err(ProviderError::TransientUpstream(e.to_string()))),
                }
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        let events: ResponseStream = Box::pin(events);
        collect_stream("anthropic", &self.model, events, Some(&sink), cancel).await
    }
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

/// Translate one SSE event into zero or more [`ResponseEvent`]s.
///
/// `input_tokens` is carried across the stream: `message_start` records it,
/// `message_delta` joins it with the output count into one Usage event.
pub(crate) fn parse_anthropic_event(
    v: &Value,
    input_tokens: &mut u32,
) -> Vec<ProviderResult<ResponseEvent>> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            *input_tokens = v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            vec![]
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                vec![Ok(ResponseEvent::ToolCallDelta {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                })]
            } else {
                vec![]
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![Ok(ResponseEvent::TextDelta(text.to_string()))]
                    }
                }
                "input_json_delta" => vec![Ok(ResponseEvent::ToolCallDelta {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                })],
                _ => vec![],
            }
        }
        "message_delta" => {
            let mut out = Vec::new();
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                out.push(Ok(ResponseEvent::Finish(map_stop_reason(reason))));
            }
            if let Some(output) = v["usage"]["output_tokens"].as_u64() {
                out.push(Ok(ResponseEvent::Usage {
                    prompt_tokens: *input_tokens,
                    completion_tokens: output as u32,
                }));
            }
            out
        }
        "message_stop" => vec![Ok(ResponseEvent::Done)],
        "error" => {
            let msg = v["error"]["message"].as_str().unwrap_or("unknown").to_string();
            vec![Err(ProviderError::TransientUpstream(msg))]
        }
        _ => vec![],
    }
}

/// Parse a non-streaming messages API response.
fn parse_blocking_response(v: &Value, model: &str) -> ProviderResult<CompletionResult> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| ProviderError::ModelProtocol("response has no content".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block["type"].as_str().unwrap_or("") {
            "text" => text.push_str(block["text"].as_str().unwrap_or("")),
            "tool_use" => tool_calls.push(ToolCallRequest {
                id: block["id"].as_str().unwrap_or("").to_string(),
                name: block["name"].as_str().unwrap_or("").to_string(),
                arguments: block["input"].to_string(),
            }),
            _ => {}
        }
    }

    Ok(CompletionResult {
        text,
        tool_calls,
        usage: Usage {
            prompt_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        },
        finish: map_stop_reason(v["stop_reason"].as_str().unwrap_or("")),
        provider: "anthropic".to_string(),
        model: model.to_string(),
    })
}

/// Convert wire messages into the `(system, messages)` pair of the messages
/// API.  Consecutive tool calls coalesce into one assistant message of
/// `tool_use` blocks; consecutive tool results coalesce into one user message
/// of `tool_result` blocks — the API rejects interleaved singletons.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system = String::new();
    let mut out: Vec<Value> = Vec::new();
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];
        match &m.content {
            MessageContent::Text(t) => {
                if m.role == Role::System {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(t);
                } else {
                    let role = if m.role == Role::Assistant { "assistant" } else { "user" };
                    out.push(json!({ "role": role, "content": t }));
                }
                i += 1;
            }
            MessageContent::ToolCall { .. } => {
                let mut blocks = Vec::new();
                while i < messages.len() {
                    if let MessageContent::ToolCall { tool_call_id, function } =
                        &messages[i].content
                    {
                        let input: Value = serde_json::from_str(&function.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tool_call_id,
                            "name": function.name,
                            "input": input,
                        }));
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            MessageContent::ToolResult { .. } => {
                let mut blocks = Vec::new();
                while i < messages.len() {
                    if let MessageContent::ToolResult { tool_call_id, content } =
                        &messages[i].content
                    {
                        blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_call_id,
                            "content": content,
                        }));
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push(json!({ "role": "user", "content": blocks }));
            }
        }
    }

    (system, out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
