// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Tools never raise errors to the orchestrator; failures are encoded here
/// and fed back to the model so it can recover.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// True when the tool execution failed non-fatally.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Per-session execution context supplied to every tool invocation.
///
/// Tools use it for resource isolation: the bash and file tools root
/// themselves in the session's working directory.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    /// Opaque caller identity.
    pub user_id: String,
    pub agent_id: String,
    pub provider: String,
    pub model: String,
    /// Session working directory for filesystem and shell tools.
    pub workdir: Option<PathBuf>,
}

impl ToolContext {
    /// Resolve `path` against the session working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            return p;
        }
        match &self.workdir {
            Some(wd) => wd.join(p),
            None => p,
        }
    }
}

/// Trait that every built-in and MCP-proxied tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object
    fn parameters_schema(&self) -> Value;
    /// Exclusive tools run serially: after all prior calls in the turn have
    /// completed, blocking subsequent ones until done.
    fn exclusive(&self) -> bool {
        false
    }
    /// Upper bound on execution time when the tool needs more than the
    /// runtime default (long builds under bash).  `None` uses the default.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
    /// Execute the tool.  Errors must be wrapped in [`ToolOutput::err`];
    /// `cancel` is honoured cooperatively at suspension points.
    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_output_is_not_error() {
        let out = ToolOutput::ok("1", "fine");
        assert!(!out.is_error);
        assert_eq!(out.content, "fine");
        assert_eq!(out.call_id, "1");
    }

    #[test]
    fn err_output_is_error() {
        let out = ToolOutput::err("2", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }

    #[test]
    fn resolve_relative_path_uses_workdir() {
        let ctx = ToolContext {
            workdir: Some(PathBuf::from("/srv/session")),
            ..ToolContext::default()
        };
        assert_eq!(ctx.resolve("notes.txt"), PathBuf::from("/srv/session/notes.txt"));
    }

    #[test]
    fn resolve_absolute_path_ignores_workdir() {
        let ctx = ToolContext {
            workdir: Some(PathBuf::from("/srv/session")),
            ..ToolContext::default()
        };
        assert_eq!(ctx.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn resolve_without_workdir_passes_through() {
        let ctx = ToolContext::default();
        assert_eq!(ctx.resolve("notes.txt"), PathBuf::from("notes.txt"));
    }
}
