// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bash;
mod calculator;
mod file;
mod random;
mod time;
mod todo;
mod web;

pub use bash::BashTool;
pub use calculator::CalculatorTool;
pub use file::{FileEditTool, FileNewTool, FileReadTool};
pub use random::RandomTool;
pub use time::TimeTool;
pub use todo::{new_todo_store, TodoItem, TodoReadTool, TodoStore, TodoWriteTool};
pub use web::{WebFetchTool, WebSearchTool};

use crate::registry::ToolRegistry;

/// Register every built-in tool named in `cfg.allow`.
///
/// The todo pair shares one store so the session sees a single list.
pub fn register_builtins(registry: &mut ToolRegistry, cfg: &freja_config::ToolsConfig) {
    let todo_store = new_todo_store();
    let allowed = |name: &str| cfg.allow.iter().any(|a| a == name);

    if allowed("bash") {
        registry.register_builtin(BashTool::new(
            cfg.bash_timeout_secs,
            cfg.bash_max_output_bytes,
            &cfg.deny_patterns,
        ));
    }
    if allowed("file_read") {
        registry.register_builtin(FileReadTool);
    }
    if allowed("file_new") {
        registry.register_builtin(FileNewTool);
    }
    if allowed("file_edit") {
        registry.register_builtin(FileEditTool);
    }
    if allowed("web_fetch") {
        registry.register_builtin(WebFetchTool);
    }
    if allowed("web_search") {
        registry.register_builtin(WebSearchTool::default());
    }
    if allowed("todo_read") {
        registry.register_builtin(TodoReadTool::new(todo_store.clone()));
    }
    if allowed("todo_write") {
        registry.register_builtin(TodoWriteTool::new(todo_store));
    }
    if allowed("calculator") {
        registry.register_builtin(CalculatorTool);
    }
    if allowed("time") {
        registry.register_builtin(TimeTool);
    }
    if allowed("random") {
        registry.register_builtin(RandomTool);
    }
}
