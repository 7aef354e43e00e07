// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Line cap for file_read when the caller does not page explicitly.
const DEFAULT_READ_LINES: usize = 2000;

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file.  'path' is resolved against the session working\n\
         directory.  Optional 'offset' (1-based line) and 'limit' page through\n\
         large files; without them the first 2000 lines are returned."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to read" },
                "offset": { "type": "integer", "description": "1-based first line (optional)" },
                "limit": { "type": "integer", "description": "Maximum lines to return (optional)" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = ctx.resolve(path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read {path}: {e}")),
        };

        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_READ_LINES as u64) as usize;

        let lines: Vec<&str> = text.lines().collect();
        if offset > lines.len() && !lines.is_empty() {
            return ToolOutput::err(
                &call.id,
                format!("offset {offset} beyond end of file ({} lines)", lines.len()),
            );
        }
        let window: Vec<&str> = lines.iter().skip(offset - 1).take(limit).copied().collect();
        let mut out = window.join("\n");
        if offset - 1 + window.len() < lines.len() {
            out.push_str(&format!(
                "\n...[truncated; {} of {} lines shown]",
                window.len(),
                lines.len()
            ));
        }
        ToolOutput::ok(&call.id, out)
    }
}

pub struct FileNewTool;

#[async_trait]
impl Tool for FileNewTool {
    fn name(&self) -> &str {
        "file_new"
    }

    fn description(&self) -> &str {
        "Create a new text file with the given content.  Parent directories\n\
         are created as needed.  Refuses to overwrite an existing file — use\n\
         file_edit for modifications."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to create" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn exclusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let Some(content) = call.args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'content'");
        };
        let resolved = ctx.resolve(path);
        if resolved.exists() {
            return ToolOutput::err(&call.id, format!("{path} already exists; use file_edit"));
        }
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("mkdir {}: {e}", parent.display()));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("created {path} ({} bytes)", content.len()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write {path}: {e}")),
        }
    }
}

pub struct FileEditTool;

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn description(&self) -> &str {
        "Edit a text file by exact replacement.  'old_text' must occur exactly\n\
         once in the file; it is replaced with 'new_text'.  Returns a line-diff\n\
         summary of the change."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old_text": { "type": "string", "description": "Exact text to replace (must be unique)" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"],
            "additionalProperties": false
        })
    }

    fn exclusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        let (Some(path), Some(old_text), Some(new_text)) = (
            call.args.get("path").and_then(|v| v.as_str()),
            call.args.get("old_text").and_then(|v| v.as_str()),
            call.args.get("new_text").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'path', 'old_text' or 'new_text'");
        };
        if old_text.is_empty() {
            return ToolOutput::err(&call.id, "'old_text' must not be empty");
        }

        let resolved = ctx.resolve(path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read {path}: {e}")),
        };

        let occurrences = text.matches(old_text).count();
        if occurrences == 0 {
            return ToolOutput::err(&call.id, format!("'old_text' not found in {path}"));
        }
        if occurrences > 1 {
            return ToolOutput::err(
                &call.id,
                format!("'old_text' occurs {occurrences} times in {path}; it must be unique"),
            );
        }

        let updated = text.replacen(old_text, new_text, 1);
        if let Err(e) = tokio::fs::write(&resolved, &updated).await {
            return ToolOutput::err(&call.id, format!("write {path}: {e}"));
        }

        let diff = TextDiff::from_lines(&text, &updated);
        let mut added = 0usize;
        let mut removed = 0usize;
        for change in diff.iter_all_changes() {
            match change.tag() {
                similar::ChangeTag::Insert => added += 1,
                similar::ChangeTag::Delete => removed += 1,
                similar::ChangeTag::Equal => {}
            }
        }
        ToolOutput::ok(
            &call.id,
            format!("edited {path}: +{added} -{removed} lines"),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx_in(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext {
            workdir: Some(dir.path().to_path_buf()),
            ..ToolContext::default()
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: name.into(), args }
    }

    // ── file_read ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_returns_file_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "line1\nline2\n").unwrap();
        let out = FileReadTool
            .execute(&call("file_read", json!({"path": "a.txt"})), &ctx_in(&dir), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "line1\nline2");
    }

    #[tokio::test]
    async fn read_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileReadTool
            .execute(&call("file_read", json!({"path": "nope.txt"})), &ctx_in(&dir), &CancellationToken::new())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_with_offset_and_limit_pages() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=10).map(|i| format!("l{i}\n")).collect();
        std::fs::write(dir.path().join("b.txt"), body).unwrap();
        let out = FileReadTool
            .execute(
                &call("file_read", json!({"path": "b.txt", "offset": 3, "limit": 2})),
                &ctx_in(&dir),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.content.starts_with("l3\nl4"));
        assert!(out.content.contains("truncated"));
    }

    // ── file_new ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn new_creates_file_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileNewTool
            .execute(
                &call("file_new", json!({"path": "sub/dir/new.txt", "content": "hi"})),
                &ctx_in(&dir),
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let written = std::fs::read_to_string(dir.path().join("sub/dir/new.txt")).unwrap();
        assert_eq!(written, "hi");
    }

    #[tokio::test]
    async fn new_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "old").unwrap();
        let out = FileNewTool
            .execute(
                &call("file_new", json!({"path": "x.txt", "content": "new"})),
                &ctx_in(&dir),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("already exists"));
        assert_eq!(std::fs::read_to_string(dir.path().join("x.txt")).unwrap(), "old");
    }

    // ── file_edit ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn edit_replaces_unique_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.txt"), "alpha\nbeta\ngamma\n").unwrap();
        let out = FileEditTool
            .execute(
                &call("file_edit", json!({"path": "c.txt", "old_text": "beta", "new_text": "BETA"})),
                &ctx_in(&dir),
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("+1 -1"));
        let updated = std::fs::read_to_string(dir.path().join("c.txt")).unwrap();
        assert_eq!(updated, "alpha\nBETA\ngamma\n");
    }

    #[tokio::test]
    async fn edit_rejects_ambiguous_old_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("d.txt"), "dup\ndup\n").unwrap();
        let out = FileEditTool
            .execute(
                &call("file_edit", json!({"path": "d.txt", "old_text": "dup", "new_text": "x"})),
                &ctx_in(&dir),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("must be unique"));
    }

    #[tokio::test]
    async fn edit_rejects_missing_old_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("e.txt"), "content\n").unwrap();
        let out = FileEditTool
            .execute(
                &call("file_edit", json!({"path": "e.txt", "old_text": "absent", "new_text": "x"})),
                &ctx_in(&dir),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"));
    }

    #[test]
    fn write_tools_are_exclusive_read_is_not() {
        assert!(FileNewTool.exclusive());
        assert!(FileEditTool.exclusive());
        assert!(!FileReadTool.exclusive());
    }
}
