// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared base implementation for OpenAI-compatible chat completion APIs.
//!
//! Most of the supported providers speak the same `/chat/completions` wire
//! format: openai, openrouter, deepinfra, zai, moonshot, github-copilot.
//! This module provides a single `OpenAICompatDriver` that every such driver
//! configures with its own defaults (URL, auth, headers).
//!
//! Construction is handled in `freja_model::from_config`.

use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{send_authorized, Auth},
    error::{ProviderError, ProviderResult},
    provider::{collect_stream, DeltaSink, Provider, ResponseStream},
    CompletionParams, CompletionResult, FinishReason, ResponseEvent, Role, ToolCallRequest,
    ToolChoice, Usage,
};

/// OpenAI-compatible chat completion driver.
pub struct OpenAICompatDriver {
    /// Provider id returned by [`Provider::name`].
    driver_name: &'static str,
    /// Model id forwarded to the API.
    model: String,
    auth: Auth,
    /// Full chat completions URL, e.g. `https://api.deepinfra.com/v1/openai/chat/completions`.
    chat_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    top_p: Option<f32>,
    /// Timeout applied to blocking requests.  Streaming requests rely on
    /// cancellation instead; a whole-response timeout would abort long
    /// streams that are still making progress.
    request_timeout: std::time::Duration,
    client: reqwest::Client,
    /// Additional HTTP headers (e.g. `HTTP-Referer` for OpenRouter).
    extra_headers: Vec<(String, String)>,
}

impl OpenAICompatDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_name: &'static str,
        model: String,
        auth: Auth,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        top_p: Option<f32>,
        request_timeout_secs: u64,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            auth,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature,
            top_p,
            request_timeout: std::time::Duration::from_secs(request_timeout_secs),
            client: reqwest::Client::new(),
            extra_headers,
        }
    }

    fn build_body(&self, params: &CompletionParams, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": build_openai_messages(&params.messages),
            "stream": stream,
            "max_tokens": params.max_tokens.unwrap_or(self.max_tokens),
        });
        if let Some(t) = params.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p.or(self.top_p) {
            body["top_p"] = json!(p);
        }
        if stream && params.include_usage {
            body["stream_options"] = json!({ "include_usage": true });
        }

        // No tools configured → omit both keys entirely; several providers
        // reject an empty tools array.
        if !params.tools.is_empty() {
            let tools: Vec<Value> = params
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = match &params.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Function(name) => {
                    json!({ "type": "function", "function": { "name": name } })
                }
            };
        }
        body
    }

    async fn send(&self, body: &Value, blocking: bool) -> ProviderResult<reqwest::Response> {
        debug!(
            driver = %self.driver_name,
            model = %self.model,
            message_count = body["messages"].as_array().map(|m| m.len()).unwrap_or(0),
            "sending completion request"
        );
        send_authorized(self.driver_name, &self.auth, |credential| {
            let mut req = self.client.post(&self.chat_url).json(body);
            if blocking {
                req = req.timeout(self.request_timeout);
            }
            if let Some(key) = credential {
                req = req.bearer_auth(key);
            }
            for (name, val) in &self.extra_headers {
                req = req.header(name.as_str(), val.as_str());
            }
            req
        })
        .await
    }
}

#[async_trait]
impl Provider for OpenAICompatDriver {
    fn name(&self) -> &str {
        self.driver_name
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
        parse_blocking_response(&v, self.driver_name, &self.model)
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
        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across chunks; emit events only for complete lines.
        let events = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<ProviderResult<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(ProviderError::TransientUpstream(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        let events: ResponseStream = Box::pin(events);
        collect_stream(self.driver_name, &self.model, events, Some(&sink), cancel).await
    }
}

/// Parse a non-streaming `/chat/completions` response body.
fn parse_blocking_response(
    v: &Value,
    provider: &str,
    model: &str,
) -> ProviderResult<CompletionResult> {
    let choice = v["choices"]
        .get(0)
        .ok_or_else(|| ProviderError::ModelProtocol("response has no choices".into()))?;
    let message = &choice["message"];

    let text = message["content"].as_str().unwrap_or("").to_string();
    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for tc in calls {
            let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
            if name.is_empty() {
                continue;
            }
            tool_calls.push(ToolCallRequest {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name,
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            });
        }
    }

    let finish = map_finish_reason(choice["finish_reason"].as_str().unwrap_or(""));
    let usage = Usage {
        prompt_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(CompletionResult {
        text,
        tool_calls,
        usage,
        finish,
        provider: provider.to_string(),
        model: model.to_string(),
    })
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<ProviderResult<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by the
/// next TCP chunk.  A single SSE event may be split across multiple packets;
/// parsing only complete lines keeps tool-call fragments from being dropped
/// or attributed to the wrong index.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<ProviderResult<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn parse_sse_chunk(v: &Value) -> Option<ProviderResult<ResponseEvent>> {
    // Usage-only chunk (emitted when stream_options.include_usage = true)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return Some(Ok(ResponseEvent::Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }

    let choice = &v["choices"][0];

    if let Some(reason) = choice["finish_reason"].as_str() {
        return Some(Ok(ResponseEvent::Finish(map_finish_reason(reason))));
    }

    let delta = &choice["delta"];

    // Tool call delta — each SSE chunk carries one tool-call fragment in
    // practice; the index routes accumulation in the collector.
    if let Some(tool_calls) = delta.get("tool_calls") {
        if let Some(tc) = tool_calls.get(0) {
            return Some(Ok(ResponseEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            }));
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(Ok(ResponseEvent::TextDelta(text.to_string())));
        }
    }

    None
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert a slice of [`crate::Message`]s into the OpenAI wire-format array.
///
/// **Parallel tool call coalescing**: the wire format requires all tool calls
/// from one assistant turn inside a *single* assistant message as a
/// `tool_calls` array.  Freja stores each tool call as a separate
/// `MessageContent::ToolCall` entry internally, so consecutive `ToolCall`
/// messages are merged into one JSON object here.
pub(crate) fn build_openai_messages(messages: &[crate::Message]) -> Vec<Value> {
    use crate::MessageContent;

    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    let mut i = 0;

    while i < messages.len() {
        let m = &messages[i];

        if let MessageContent::ToolCall { tool_call_id, function } = &m.content {
            let mut calls = vec![tool_call_to_json(tool_call_id, function)];
            i += 1;
            while i < messages.len() {
                if let MessageContent::ToolCall { tool_call_id, function } = &messages[i].content {
                    calls.push(tool_call_to_json(tool_call_id, function));
                    i += 1;
                } else {
                    break;
                }
            }
            result.push(json!({ "role": "assistant", "tool_calls": calls }));
            continue;
        }

        let v = match &m.content {
            MessageContent::Text(t) => json!({
                "role": role_str(&m.role),
                "content": t,
            }),
            MessageContent::ToolCall { .. } => unreachable!("handled above"),
            MessageContent::ToolResult { tool_call_id, content } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        };
        result.push(v);
        i += 1;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
