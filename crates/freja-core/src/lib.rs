// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod conversation;
mod events;
mod integration;

pub use agent::{Agent, AgentError, TurnOptions, TurnOutcome};
pub use conversation::{
    to_wire, verify_tool_pairing, DeclaredToolCall, HistoryStore, MemoryHistory, MessageKind,
    StoredMessage, TurnMeta,
};
pub use events::{error_kind_for, EventSink, TurnErrorKind, TurnEvent};
pub use integration::ToolIntegration;
