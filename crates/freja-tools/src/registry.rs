// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::normalize::normalize_args;
use crate::validate::validate_args;
use crate::{Tool, ToolCall, ToolContext, ToolOutput};

/// Where a registered tool came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    Builtin,
    /// Proxied from the MCP server with this id.
    Mcp(String),
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolOrigin::Builtin => write!(f, "built-in"),
            ToolOrigin::Mcp(id) => write!(f, "mcp:{id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Tool names must stay unambiguous: the later registration loses.
    #[error("tool name {name:?} already registered by {existing}")]
    NameCollision { name: String, existing: ToolOrigin },
}

/// A tool schema — the registry's view, independent of the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

struct Entry {
    tool: Arc<dyn Tool>,
    origin: ToolOrigin,
}

/// Central registry holding all available tools.
///
/// Registration is a rare administrative action (app start, MCP connect);
/// after that, readers are lock-free and execution takes `&self`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  A name collision with an existing tool (built-in or
    /// MCP) rejects the later registration so the orchestrator can never
    /// dispatch to an ambiguous name.
    pub fn register(&mut self, tool: Arc<dyn Tool>, origin: ToolOrigin) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if let Some(existing) = self.tools.get(&name) {
            warn!(
                tool = %name,
                existing = %existing.origin,
                rejected = %origin,
                "tool name collision; rejecting later registration"
            );
            return Err(RegistryError::NameCollision {
                name,
                existing: existing.origin.clone(),
            });
        }
        self.tools.insert(name, Entry { tool, origin });
        Ok(())
    }

    /// Register a built-in tool, panicking on collision — built-ins are
    /// registered once at startup from a fixed set, so a collision there is
    /// a programming error.
    pub fn register_builtin(&mut self, tool: impl Tool + 'static) {
        self.register(Arc::new(tool), ToolOrigin::Builtin)
            .expect("built-in tool names are unique");
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Remove every tool sourced from the given MCP server.
    pub fn unregister_mcp_server(&mut self, server_id: &str) {
        self.tools
            .retain(|_, e| e.origin != ToolOrigin::Mcp(server_id.to_string()));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn origin(&self, name: &str) -> Option<&ToolOrigin> {
        self.tools.get(name).map(|e| &e.origin)
    }

    /// True when the named tool demands serial execution.
    pub fn is_exclusive(&self, name: &str) -> bool {
        self.tools.get(name).map(|e| e.tool.exclusive()).unwrap_or(false)
    }

    /// Schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|e| ToolSchema {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Schemas for the subset of tools an agent has enabled.
    pub fn schemas_for(&self, enabled: &[String]) -> Vec<ToolSchema> {
        self.schemas()
            .into_iter()
            .filter(|s| enabled.iter().any(|e| e == &s.name))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a tool call: normalize arguments, validate against the tool's
    /// schema, then run.  Unknown tools and validation failures come back as
    /// error outputs for the model, never as orchestrator errors.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        let Some(entry) = self.tools.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };

        let schema = entry.tool.parameters_schema();
        let args = normalize_args(&schema, call.args.clone());
        if let Err(reason) = validate_args(&schema, &args) {
            return ToolOutput::err(&call.id, format!("invalid arguments: {reason}"));
        }

        let normalized = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args,
        };
        entry.tool.execute(&normalized, ctx, cancel).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    /// Minimal echo tool for registry tests.
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            call: &ToolCall,
            _ctx: &ToolContext,
            _cancel: &CancellationToken,
        ) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args["text"]))
        }
    }

    struct NestedTool;

    #[async_trait]
    impl Tool for NestedTool {
        fn name(&self) -> &str {
            "nested"
        }
        fn description(&self) -> &str {
            "accepts a nested object"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "filter": { "type": "object" } },
                "required": ["filter"]
            })
        }
        async fn execute(
            &self,
            call: &ToolCall,
            _ctx: &ToolContext,
            _cancel: &CancellationToken,
        ) -> ToolOutput {
            ToolOutput::ok(&call.id, call.args["filter"]["lang"].to_string())
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: name.into(), args }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
        assert_eq!(reg.origin("echo"), Some(&ToolOrigin::Builtin));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "echo" });
        let err = reg
            .register(Arc::new(EchoTool { name: "echo" }), ToolOrigin::Mcp("srv".into()))
            .unwrap_err();
        match err {
            RegistryError::NameCollision { name, existing } => {
                assert_eq!(name, "echo");
                assert_eq!(existing, ToolOrigin::Builtin);
            }
        }
        // The original registration stays in place.
        assert_eq!(reg.origin("echo"), Some(&ToolOrigin::Builtin));
    }

    #[test]
    fn unregister_mcp_server_removes_only_its_tools() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "echo" });
        reg.register(Arc::new(EchoTool { name: "remote_a" }), ToolOrigin::Mcp("srv".into()))
            .unwrap();
        reg.register(Arc::new(EchoTool { name: "remote_b" }), ToolOrigin::Mcp("other".into()))
            .unwrap();
        reg.unregister_mcp_server("srv");
        assert!(reg.get("remote_a").is_none());
        assert!(reg.get("remote_b").is_some());
        assert!(reg.get("echo").is_some());
    }

    #[test]
    fn schemas_sorted_and_filterable() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "zeta" });
        reg.register_builtin(EchoTool { name: "alpha" });
        let schemas = reg.schemas();
        assert_eq!(schemas[0].name, "alpha");
        assert_eq!(schemas[1].name, "zeta");

        let filtered = reg.schemas_for(&["zeta".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "zeta");
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "echo" });
        let out = reg
            .execute(&call("echo", json!({"text": "hi"})), &ToolContext::default(), &CancellationToken::new())
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error_output() {
        let reg = ToolRegistry::new();
        let out = reg
            .execute(&call("missing", json!({})), &ToolContext::default(), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn execute_invalid_args_returns_validation_error() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "echo" });
        let out = reg
            .execute(&call("echo", json!({"text": 42})), &ToolContext::default(), &CancellationToken::new())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid arguments"), "{}", out.content);
    }

    #[tokio::test]
    async fn execute_normalizes_stringified_objects_before_validation() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(NestedTool);
        let out = reg
            .execute(
                &call("nested", json!({"filter": "{\"lang\":\"rust\"}"})),
                &ToolContext::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("rust"));
    }

    #[test]
    fn exclusive_defaults_to_false_and_unknown_is_false() {
        let mut reg = ToolRegistry::new();
        reg.register_builtin(EchoTool { name: "echo" });
        assert!(!reg.is_exclusive("echo"));
        assert!(!reg.is_exclusive("nope"));
    }
}
