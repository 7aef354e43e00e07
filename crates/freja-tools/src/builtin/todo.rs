// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// A structured todo item managed by the todo tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// Shared in-memory todo list.  The read and write tools hold the same store
/// so a session sees one consistent list.
pub type TodoStore = Arc<Mutex<Vec<TodoItem>>>;

pub fn new_todo_store() -> TodoStore {
    Arc::new(Mutex::new(Vec::new()))
}

fn render(todos: &[TodoItem]) -> String {
    if todos.is_empty() {
        return "(todo list is empty)".to_string();
    }
    todos
        .iter()
        .map(|t| {
            let mark = match t.status.as_str() {
                "completed" => "x",
                "in_progress" => ">",
                "cancelled" => "-",
                _ => " ",
            };
            format!("[{mark}] {} {}", t.id, t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct TodoReadTool {
    store: TodoStore,
}

impl TodoReadTool {
    pub fn new(store: TodoStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current session todo list."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        let todos = self.store.lock().expect("todo lock poisoned");
        ToolOutput::ok(&call.id, render(&todos))
    }
}

pub struct TodoWriteTool {
    store: TodoStore,
}

impl TodoWriteTool {
    pub fn new(store: TodoStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the session todo list.  'todos' is the full new list; items\n\
         carry id, content and status (pending | in_progress | completed |\n\
         cancelled)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string" }
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn exclusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        let Some(items) = call.args.get("todos").and_then(|v| v.as_array()) else {
            return ToolOutput::err(&call.id, "missing 'todos'");
        };

        let mut todos = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let content = item.get("content").and_then(|v| v.as_str()).unwrap_or("");
            if content.is_empty() {
                return ToolOutput::err(&call.id, format!("todos[{i}] has empty content"));
            }
            let status = item
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("pending")
                .to_string();
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}", i + 1));
            todos.push(TodoItem { id, content: content.to_string(), status });
        }

        let rendered = render(&todos);
        *self.store.lock().expect("todo lock poisoned") = todos;
        ToolOutput::ok(&call.id, rendered)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
