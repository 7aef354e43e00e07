// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Current date and time.  Optional 'utc_offset_minutes' shifts the\n\
         result; optional strftime 'format' overrides the RFC 3339 default."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "description": "Minutes east of UTC (optional, default 0)"
                },
                "format": {
                    "type": "string",
                    "description": "strftime format string (optional)"
                }
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
        let offset_minutes = call
            .args
            .get("utc_offset_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let Some(offset) = FixedOffset::east_opt((offset_minutes * 60) as i32) else {
            return ToolOutput::err(&call.id, format!("invalid utc offset: {offset_minutes}"));
        };
        let now = Utc::now().with_timezone(&offset);

        match call.args.get("format").and_then(|v| v.as_str()) {
            Some(fmt) => ToolOutput::ok(&call.id, now.format(fmt).to_string()),
            None => ToolOutput::ok(&call.id, now.to_rfc3339()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: "time".into(), args }
    }

    #[tokio::test]
    async fn default_output_is_rfc3339() {
        let out = TimeTool
            .execute(&call(json!({})), &ToolContext::default(), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        // RFC 3339 contains a 'T' separator and an offset.
        assert!(out.content.contains('T'), "{}", out.content);
    }

    #[tokio::test]
    async fn offset_shifts_the_result() {
        let out = TimeTool
            .execute(
                &call(json!({"utc_offset_minutes": 120, "format": "%z"})),
                &ToolContext::default(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.content, "+0200");
    }

    #[tokio::test]
    async fn custom_format_is_applied() {
        let out = TimeTool
            .execute(
                &call(json!({"format": "%Y"})),
                &ToolContext::default(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.content.len(), 4, "{}", out.content);
        assert!(out.content.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn absurd_offset_is_error() {
        let out = TimeTool
            .execute(
                &call(json!({"utc_offset_minutes": 100000})),
                &ToolContext::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_error);
    }
}
