// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool integration: turns a completion's tool calls into executed results.
//!
//! Calls within one assistant turn execute in parallel by default; a tool
//! that declares itself `exclusive` acts as a barrier — it runs after all
//! prior calls in the turn have completed and blocks subsequent ones until
//! done.  Results always come back in the model's emission order.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use freja_model::ToolCallRequest;
use freja_tools::{ToolCall, ToolContext, ToolOutput, ToolRegistry};

use crate::events::{EventSink, TurnEvent};

pub struct ToolIntegration {
    registry: Arc<ToolRegistry>,
    /// Runtime default per-tool timeout; tools may override upward (bash).
    tool_timeout_secs: u64,
}

enum Plan {
    /// Arguments parsed; ready to dispatch.
    Exec(ToolCall),
    /// Parse failure: a synthetic error result is fed back to the model.
    Synthetic(ToolOutput),
}

impl ToolIntegration {
    pub fn new(registry: Arc<ToolRegistry>, tool_timeout_secs: u64) -> Self {
        Self { registry, tool_timeout_secs }
    }

    /// Execute all tool calls of one assistant turn.
    ///
    /// The returned outputs are ordered exactly like `calls`, regardless of
    /// completion order.
    pub async fn execute_round(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ToolContext,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Vec<ToolOutput> {
        let mut outputs: Vec<Option<ToolOutput>> = (0..calls.len()).map(|_| None).collect();
        let mut batch: Vec<(usize, ToolCall)> = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            match self.plan(call) {
                Plan::Synthetic(out) => {
                    let _ = events
                        .send(TurnEvent::ToolStarted {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            args: Value::String(call.arguments.clone()),
                        })
                        .await;
                    let _ = events
                        .send(TurnEvent::ToolFinished {
                            call_id: out.call_id.clone(),
                            name: call.name.clone(),
                            output: out.content.clone(),
                            is_error: out.is_error,
                        })
                        .await;
                    outputs[i] = Some(out);
                }
                Plan::Exec(tc) => {
                    if self.registry.is_exclusive(&tc.name) {
                        // Barrier: drain running calls, run this one alone.
                        self.flush(&mut batch, &mut outputs, ctx, cancel, events).await;
                        batch.push((i, tc));
                        self.flush(&mut batch, &mut outputs, ctx, cancel, events).await;
                    } else {
                        batch.push((i, tc));
                    }
                }
            }
        }
        self.flush(&mut batch, &mut outputs, ctx, cancel, events).await;

        outputs
            .into_iter()
            .enumerate()
            .map(|(i, out)| {
                out.unwrap_or_else(|| ToolOutput::err(&calls[i].id, "tool did not produce a result"))
            })
            .collect()
    }

    fn plan(&self, call: &ToolCallRequest) -> Plan {
        // An empty arguments string means "no arguments"; models that call
        // zero-parameter tools often send nothing at all.
        let raw = if call.arguments.trim().is_empty() { "{}" } else { call.arguments.as_str() };
        match serde_json::from_str::<Value>(raw) {
            Ok(args) => Plan::Exec(ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                args,
            }),
            Err(e) => {
                debug!(tool = %call.name, call_id = %call.id, "unparseable tool arguments");
                Plan::Synthetic(ToolOutput::err(
                    &call.id,
                    format!("invalid arguments: {e}"),
                ))
            }
        }
    }

    /// Run all batched calls concurrently; emit starts for the whole batch
    /// first, then await in order so finish events and result slots follow
    /// the model's ordering.
    async fn flush(
        &self,
        batch: &mut Vec<(usize, ToolCall)>,
        outputs: &mut [Option<ToolOutput>],
        ctx: &ToolContext,
        cancel: &CancellationToken,
        events: &EventSink,
    ) {
        if batch.is_empty() {
            return;
        }
        let running: Vec<(usize, ToolCall)> = batch.drain(..).collect();

        for (_, tc) in &running {
            let _ = events
                .send(TurnEvent::ToolStarted {
                    call_id: tc.id.clone(),
                    name: tc.name.clone(),
                    args: tc.args.clone(),
                })
                .await;
        }

        let mut tasks = Vec::with_capacity(running.len());
        for (i, tc) in running {
            let registry = Arc::clone(&self.registry);
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let timeout_secs = registry
                .get(&tc.name)
                .and_then(|t| t.timeout_secs())
                .unwrap_or(self.tool_timeout_secs);
            let call_id = tc.id.clone();
            let name = tc.name.clone();
            let task = tokio::spawn(async move {
                let run = registry.execute(&tc, &ctx, &cancel);
                match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), run).await
                {
                    Ok(out) => out,
                    Err(_) => ToolOutput::err(&tc.id, format!("timeout after {timeout_secs}s")),
                }
            });
            tasks.push((i, call_id, name, task));
        }

        for (i, call_id, name, task) in tasks {
            let out = match task.await {
                Ok(out) => out,
                // Task panicked — treat as a tool error, never crash the turn.
                Err(e) => ToolOutput::err(&call_id, format!("tool panicked: {e}")),
            };
            let _ = events
                .send(TurnEvent::ToolFinished {
                    call_id: out.call_id.clone(),
                    name,
                    output: out.content.clone(),
                    is_error: out.is_error,
                })
                .await;
            outputs[i] = Some(out);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use freja_tools::Tool;

    use super::*;

    /// Sleeps for args.ms, then reports its tag and how many peers were
    /// running concurrently while it slept.
    struct SleepTool {
        running: Arc<AtomicU32>,
        peak: Arc<AtomicU32>,
        exclusive: bool,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            if self.exclusive { "sleep_exclusive" } else { "sleep" }
        }
        fn description(&self) -> &str {
            "sleeps then echoes its tag"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "ms": { "type": "integer" },
                    "tag": { "type": "string" }
                },
                "required": ["tag"]
            })
        }
        fn exclusive(&self) -> bool {
            self.exclusive
        }
        async fn execute(
            &self,
            call: &ToolCall,
            _ctx: &ToolContext,
            _cancel: &CancellationToken,
        ) -> ToolOutput {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let ms = call.args["ms"].as_u64().unwrap_or(10);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ToolOutput::ok(&call.id, call.args["tag"].as_str().unwrap_or("?").to_string())
        }
    }

    fn setup(exclusive_too: bool) -> (ToolIntegration, Arc<AtomicU32>) {
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register_builtin(SleepTool {
            running: Arc::clone(&running),
            peak: Arc::clone(&peak),
            exclusive: false,
        });
        if exclusive_too {
            reg.register_builtin(SleepTool {
                running: Arc::clone(&running),
                peak: Arc::clone(&peak),
                exclusive: true,
            });
        }
        (ToolIntegration::new(Arc::new(reg), 5), peak)
    }

    fn req(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest { id: id.into(), name: name.into(), arguments: args.into() }
    }

    #[tokio::test]
    async fn parallel_calls_overlap_and_return_in_order() {
        let (integration, peak) = setup(false);
        let (tx, mut rx) = mpsc::channel(64);
        let calls = vec![
            req("t1", "sleep", r#"{"ms": 60, "tag": "first"}"#),
            req("t2", "sleep", r#"{"ms": 5, "tag": "second"}"#),
        ];
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        drop(tx);

        // Order follows the model's emission order even though t2 finished first.
        assert_eq!(outputs[0].content, "first");
        assert_eq!(outputs[1].content, "second");
        assert!(peak.load(Ordering::SeqCst) >= 2, "calls should have overlapped");

        // Both starts precede any finish.
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        let first_finish = events
            .iter()
            .position(|e| matches!(e, TurnEvent::ToolFinished { .. }))
            .unwrap();
        let start_count_before = events[..first_finish]
            .iter()
            .filter(|e| matches!(e, TurnEvent::ToolStarted { .. }))
            .count();
        assert_eq!(start_count_before, 2);
    }

    #[tokio::test]
    async fn exclusive_tool_serializes_the_round() {
        let (integration, peak) = setup(true);
        let (tx, _rx) = mpsc::channel(64);
        let calls = vec![
            req("t1", "sleep", r#"{"ms": 30, "tag": "a"}"#),
            req("t2", "sleep_exclusive", r#"{"ms": 30, "tag": "b"}"#),
            req("t3", "sleep", r#"{"ms": 30, "tag": "c"}"#),
        ];
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        assert_eq!(outputs.iter().map(|o| o.content.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(peak.load(Ordering::SeqCst), 1, "exclusive barrier must prevent overlap");
    }

    #[tokio::test]
    async fn unparseable_arguments_produce_synthetic_error() {
        let (integration, _) = setup(false);
        let (tx, mut rx) = mpsc::channel(64);
        let calls = vec![req("t1", "sleep", "not json")];
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        drop(tx);

        assert!(outputs[0].is_error);
        assert!(outputs[0].content.contains("invalid arguments"), "{}", outputs[0].content);

        // Start/finish pair still emitted so the UI sees the failed call.
        let mut saw_start = false;
        let mut saw_finish = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                TurnEvent::ToolStarted { .. } => saw_start = true,
                TurnEvent::ToolFinished { is_error, .. } => {
                    saw_finish = true;
                    assert!(is_error);
                }
                _ => {}
            }
        }
        assert!(saw_start && saw_finish);
    }

    #[tokio::test]
    async fn empty_arguments_become_empty_object() {
        let (integration, _) = setup(false);
        let (tx, _rx) = mpsc::channel(64);
        // "tag" missing → schema validation catches it, but parsing must not.
        let calls = vec![req("t1", "sleep", "")];
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        assert!(outputs[0].is_error);
        assert!(outputs[0].content.contains("invalid arguments"), "{}", outputs[0].content);
        assert!(outputs[0].content.contains("tag"), "{}", outputs[0].content);
    }

    #[tokio::test]
    async fn unknown_tool_produces_error_output() {
        let (integration, _) = setup(false);
        let (tx, _rx) = mpsc::channel(64);
        let calls = vec![req("t1", "no_such_tool", "{}")];
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        assert!(outputs[0].is_error);
        assert!(outputs[0].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn slow_tool_hits_integration_timeout() {
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let mut reg = ToolRegistry::new();
        reg.register_builtin(SleepTool { running, peak, exclusive: false });
        // 0-second budget: the sleep can never finish.
        let integration = ToolIntegration::new(Arc::new(reg), 0);
        let (tx, _rx) = mpsc::channel(64);
        let calls = vec![req("t1", "sleep", r#"{"ms": 200, "tag": "late"}"#)];
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        assert!(outputs[0].is_error);
        assert!(outputs[0].content.contains("timeout"));
    }

    /// The registry collision rule plus ordered outputs keeps duplicate ids
    /// from different servers impossible; this guards the output order for a
    /// larger mixed round.
    #[tokio::test]
    async fn large_round_preserves_emission_order() {
        let (integration, _) = setup(false);
        let (tx, _rx) = mpsc::channel(256);
        let calls: Vec<ToolCallRequest> = (0..8)
            .map(|i| {
                let ms = 40 - i * 5;
                req(
                    &format!("t{i}"),
                    "sleep",
                    &format!(r#"{{"ms": {ms}, "tag": "tag{i}"}}"#),
                )
            })
            .collect();
        let outputs = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.content, format!("tag{i}"));
        }
    }

    #[tokio::test]
    async fn tool_started_args_are_parsed_values() {
        let (integration, _) = setup(false);
        let (tx, mut rx) = mpsc::channel(64);
        let calls = vec![req("t1", "sleep", r#"{"ms": 1, "tag": "x"}"#)];
        let _ = integration
            .execute_round(&calls, &ToolContext::default(), &CancellationToken::new(), &tx)
            .await;
        drop(tx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        while let Some(ev) = rx.recv().await {
            if let TurnEvent::ToolStarted { args, .. } = ev {
                seen.lock().unwrap().push(args);
            }
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["tag"], "x");
    }
}
