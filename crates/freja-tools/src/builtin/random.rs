// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

pub struct RandomTool;

#[async_trait]
impl Tool for RandomTool {
    fn name(&self) -> &str {
        "random"
    }

    fn description(&self) -> &str {
        "Random values.  With 'choices', picks one element; otherwise returns\n\
         an integer in [min, max] (defaults 0..100).  'uuid': true returns a\n\
         random UUID instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "min": { "type": "integer", "description": "Lower bound, inclusive (default 0)" },
                "max": { "type": "integer", "description": "Upper bound, inclusive (default 100)" },
                "choices": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Pick one of these values instead"
                },
                "uuid": { "type": "boolean", "description": "Return a random UUID" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        if call.args.get("uuid").and_then(|v| v.as_bool()).unwrap_or(false) {
            return ToolOutput::ok(&call.id, uuid::Uuid::new_v4().to_string());
        }

        if let Some(choices) = call.args.get("choices").and_then(|v| v.as_array()) {
            if choices.is_empty() {
                return ToolOutput::err(&call.id, "'choices' must not be empty");
            }
            let idx = rand::thread_rng().gen_range(0..choices.len());
            let picked = choices[idx].as_str().map(str::to_string).unwrap_or_else(|| choices[idx].to_string());
            return ToolOutput::ok(&call.id, picked);
        }

        let min = call.args.get("min").and_then(|v| v.as_i64()).unwrap_or(0);
        let max = call.args.get("max").and_then(|v| v.as_i64()).unwrap_or(100);
        if min > max {
            return ToolOutput::err(&call.id, format!("min {min} exceeds max {max}"));
        }
        let n = rand::thread_rng().gen_range(min..=max);
        ToolOutput::ok(&call.id, n.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
