// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-conversation message log.
//!
//! Append-only from the orchestrator's perspective: only the active turn's
//! orchestrator writes, readers obtain cloned snapshots.  The store sits
//! behind [`HistoryStore`] so persistence can be swapped in without touching
//! the orchestrator.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use freja_model::Message;

/// One message in a conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

/// Tagged message body.  The `Tool` variant carries its call id, name and
/// result structurally instead of scattering optionals across one struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageKind {
    System {
        text: String,
    },
    User {
        text: String,
    },
    Assistant {
        /// May be empty for pure tool-call turns.
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<DeclaredToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<TurnMeta>,
    },
    Tool {
        call_id: String,
        name: String,
        result: String,
        is_error: bool,
    },
}

/// A tool call declared by an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the model emitted them.
    pub arguments: String,
}

/// Provenance and cost metadata stamped on final assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMeta {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub response_time_ms: u64,
}

impl StoredMessage {
    fn new(kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageKind::User { text: text.into() })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageKind::System { text: text.into() })
    }

    pub fn assistant(text: impl Into<String>, meta: Option<TurnMeta>) -> Self {
        Self::new(MessageKind::Assistant {
            text: text.into(),
            tool_calls: Vec::new(),
            meta,
        })
    }

    pub fn assistant_with_calls(
        text: impl Into<String>,
        tool_calls: Vec<DeclaredToolCall>,
        meta: Option<TurnMeta>,
    ) -> Self {
        Self::new(MessageKind::Assistant {
            text: text.into(),
            tool_calls,
            meta,
        })
    }

    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(MessageKind::Tool {
            call_id: call_id.into(),
            name: name.into(),
            result: result.into(),
            is_error,
        })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::System { text }
            | MessageKind::User { text }
            | MessageKind::Assistant { text, .. } => Some(text),
            MessageKind::Tool { .. } => None,
        }
    }
}

/// History port: the orchestrator's only view of conversation storage.
pub trait HistoryStore: Send + Sync {
    /// Append one message, creating the conversation on first use.
    fn append(&self, conversation: &str, message: StoredMessage);
    /// Immutable snapshot of the conversation (empty when unknown).
    fn snapshot(&self, conversation: &str) -> Vec<StoredMessage>;
    /// Destroy a conversation.  Returns false when it never existed.
    fn delete(&self, conversation: &str) -> bool;
    fn list(&self) -> Vec<String>;
}

/// In-memory implementation of the history port.
#[derive(Default)]
pub struct MemoryHistory {
    inner: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, conversation: &str, message: StoredMessage) {
        self.inner
            .write()
            .expect("history lock poisoned")
            .entry(conversation.to_string())
            .or_default()
            .push(message);
    }

    fn snapshot(&self, conversation: &str) -> Vec<StoredMessage> {
        self.inner
            .read()
            .expect("history lock poisoned")
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    fn delete(&self, conversation: &str) -> bool {
        self.inner
            .write()
            .expect("history lock poisoned")
            .remove(conversation)
            .is_some()
    }

    fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .expect("history lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Build the provider wire messages for a snapshot.
///
/// Assistant messages with tool calls expand into one wire tool-call message
/// per call (the OpenAI-compatible builder coalesces them again for the wire
/// format that wants one assistant message).
pub fn to_wire(messages: &[StoredMessage], system_prompt: Option<&str>) -> Vec<Message> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if let Some(prompt) = system_prompt {
        if !prompt.is_empty() {
            wire.push(Message::system(prompt));
        }
    }
    for m in messages {
        match &m.kind {
            MessageKind::System { text } => wire.push(Message::system(text.clone())),
            MessageKind::User { text } => wire.push(Message::user(text.clone())),
            MessageKind::Assistant { text, tool_calls, .. } => {
                if !text.is_empty() {
                    wire.push(Message::assistant(text.clone()));
                }
                for tc in tool_calls {
                    wire.push(Message::tool_call(&tc.id, &tc.name, &tc.arguments));
                }
            }
            MessageKind::Tool { call_id, result, .. } => {
                wire.push(Message::tool_result(call_id, result.clone()));
            }
        }
    }
    wire
}

/// Check the tool-pairing invariant over a conversation: every tool message
/// references a call declared by the immediately preceding assistant
/// message, and every declared call id is answered by exactly one tool
/// message before the next non-tool message.
pub fn verify_tool_pairing(messages: &[StoredMessage]) -> Result<(), String> {
    let mut i = 0;
    while i < messages.len() {
        if let MessageKind::Assistant { tool_calls, .. } = &messages[i].kind {
            if !tool_calls.is_empty() {
                let mut expected: Vec<&str> = tool_calls.iter().map(|c| c.id.as_str()).collect();
                let mut j = i + 1;
                while j < messages.len() {
                    match &messages[j].kind {
                        MessageKind::Tool { call_id, .. } => {
                            let Some(pos) = expected.iter().position(|id| id == call_id) else {
                                return Err(format!(
                                    "tool message {call_id:?} answers no declared call"
                                ));
                            };
                            expected.remove(pos);
                            j += 1;
                        }
                        _ => break,
                    }
                }
                if !expected.is_empty() {
                    return Err(format!("unanswered tool calls: {expected:?}"));
                }
                i = j;
                continue;
            }
        } else if let MessageKind::Tool { call_id, .. } = &messages[i].kind {
            return Err(format!("orphan tool message {call_id:?}"));
        }
        i += 1;
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
