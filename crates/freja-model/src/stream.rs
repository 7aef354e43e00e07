// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-turn reassembly of a streamed completion.
//!
//! Providers emit fragmented tool calls: the opening delta carries `id` and
//! `name`, every following delta only an `arguments` fragment.  Fragments are
//! keyed by the parallel-tool-call `index` field, NOT by id — several
//! providers only send the id on the opening delta, so id-keyed accumulation
//! would scatter fragments into the wrong slots.

use std::collections::BTreeMap;

use tracing::warn;

use crate::{CompletionResult, FinishReason, ResponseEvent, ToolCallRequest, Usage};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed deltas into an immutable [`CompletionResult`].
///
/// [`apply`](StreamCollector::apply) is a pure reducer over one delta;
/// [`finish`](StreamCollector::finish) seals the state.
#[derive(Debug, Default)]
pub struct StreamCollector {
    text: String,
    calls: BTreeMap<u32, PartialToolCall>,
    usage: Usage,
    finish: Option<FinishReason>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta into the state.  Returns `true` when the stream is done.
    pub fn apply(&mut self, event: &ResponseEvent) -> bool {
        match event {
            ResponseEvent::TextDelta(t) => self.text.push_str(t),
            ResponseEvent::ToolCallDelta { index, id, name, arguments } => {
                let partial = self.calls.entry(*index).or_default();
                if !id.is_empty() {
                    partial.id = id.clone();
                }
                if !name.is_empty() {
                    partial.name = name.clone();
                }
                partial.arguments.push_str(arguments);
            }
            ResponseEvent::Usage { prompt_tokens, completion_tokens } => {
                self.usage = Usage {
                    prompt_tokens: *prompt_tokens,
                    completion_tokens: *completion_tokens,
                };
            }
            ResponseEvent::Finish(reason) => self.finish = Some(*reason),
            ResponseEvent::Done => return true,
        }
        false
    }

    /// Seal the accumulated state into a [`CompletionResult`].
    ///
    /// Tool calls are emitted in index order.  Calls with an empty name cannot
    /// be dispatched and are dropped; an empty id gets a synthetic fallback so
    /// the turn can still complete and the history stays well-formed.
    pub fn finish(self, provider: &str, model: &str) -> CompletionResult {
        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for (i, (_, partial)) in self.calls.into_iter().enumerate() {
            if partial.name.is_empty() {
                warn!(
                    tool_call_id = %partial.id,
                    "dropping tool call with empty name from model; cannot dispatch"
                );
                continue;
            }
            let id = if partial.id.is_empty() {
                warn!(
                    tool_name = %partial.name,
                    "tool call from model had empty id; generating synthetic id"
                );
                format!("tc_synthetic_{i}")
            } else {
                partial.id
            };
            tool_calls.push(ToolCallRequest {
                id,
                name: partial.name,
                arguments: partial.arguments,
            });
        }

        let finish = self.finish.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        CompletionResult {
            text: self.text,
            tool_calls,
            usage: self.usage,
            finish,
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: u32, id: &str, name: &str, args: &str) -> ResponseEvent {
        ResponseEvent::ToolCallDelta {
            index,
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[test]
    fn text_deltas_concatenate_in_order() {
        let mut c = StreamCollector::new();
        for t in ["Hi ", "there", "!"] {
            c.apply(&ResponseEvent::TextDelta(t.into()));
        }
        let r = c.finish("echo", "echo-1");
        assert_eq!(r.text, "Hi there!");
        assert_eq!(r.finish, FinishReason::Stop);
    }

    #[test]
    fn argument_fragments_concatenate_per_index() {
        // Invariant: for any fragment sequence, the reassembled arguments
        // string equals the concatenation of fragments in emission order.
        let mut c = StreamCollector::new();
        c.apply(&delta(0, "call_1", "web_search", ""));
        c.apply(&delta(0, "", "", r#"{"query"#));
        c.apply(&delta(0, "", "", r#"":"rust"}"#));
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].id, "call_1");
        assert_eq!(r.tool_calls[0].arguments, r#"{"query":"rust"}"#);
    }

    #[test]
    fn interleaved_indices_do_not_cross_contaminate() {
        let mut c = StreamCollector::new();
        c.apply(&delta(0, "c0", "grep", ""));
        c.apply(&delta(1, "c1", "glob", ""));
        c.apply(&delta(0, "", "", r#"{"pattern":"a"}"#));
        c.apply(&delta(1, "", "", r#"{"pattern":"b"}"#));
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.tool_calls[0].arguments, r#"{"pattern":"a"}"#);
        assert_eq!(r.tool_calls[1].arguments, r#"{"pattern":"b"}"#);
    }

    #[test]
    fn tool_calls_ordered_by_index_not_arrival() {
        let mut c = StreamCollector::new();
        c.apply(&delta(2, "late", "second", "{}"));
        c.apply(&delta(0, "early", "first", "{}"));
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.tool_calls[0].id, "early");
        assert_eq!(r.tool_calls[1].id, "late");
    }

    #[test]
    fn finish_reason_defaults_to_tool_calls_when_calls_present() {
        let mut c = StreamCollector::new();
        c.apply(&delta(0, "c", "time", "{}"));
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.finish, FinishReason::ToolCalls);
    }

    #[test]
    fn explicit_finish_reason_wins() {
        let mut c = StreamCollector::new();
        c.apply(&ResponseEvent::TextDelta("truncat".into()));
        c.apply(&ResponseEvent::Finish(FinishReason::Length));
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.finish, FinishReason::Length);
    }

    #[test]
    fn empty_name_call_is_dropped() {
        let mut c = StreamCollector::new();
        c.apply(&delta(0, "c0", "", "{}"));
        let r = c.finish("openai", "gpt-4o");
        assert!(r.tool_calls.is_empty());
    }

    #[test]
    fn empty_id_gets_synthetic_fallback() {
        let mut c = StreamCollector::new();
        c.apply(&delta(0, "", "bash", "{}"));
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.tool_calls[0].id, "tc_synthetic_0");
    }

    #[test]
    fn usage_recorded_from_final_chunk() {
        let mut c = StreamCollector::new();
        c.apply(&ResponseEvent::TextDelta("ok".into()));
        c.apply(&ResponseEvent::Usage { prompt_tokens: 11, completion_tokens: 7 });
        let r = c.finish("openai", "gpt-4o");
        assert_eq!(r.usage.prompt_tokens, 11);
        assert_eq!(r.usage.completion_tokens, 7);
    }

    #[test]
    fn done_event_signals_stream_end() {
        let mut c = StreamCollector::new();
        assert!(!c.apply(&ResponseEvent::TextDelta("x".into())));
        assert!(c.apply(&ResponseEvent::Done));
    }

    #[test]
    fn provider_and_model_stamped_on_result() {
        let c = StreamCollector::new();
        let r = c.finish("anthropic", "claude-sonnet-4");
        assert_eq!(r.provider, "anthropic");
        assert_eq!(r.model, "claude-sonnet-4");
    }
}
