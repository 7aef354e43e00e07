// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Hard ceiling on the execution timeout, regardless of what the model asks for.
const MAX_TIMEOUT_SECS: u64 = 600;

/// Share of the output byte budget reserved for the tail.  Build and test
/// runs put their errors and summaries last, so the end of the output is
/// worth more than the beginning.
const TAIL_SHARE: usize = 3;
const BUDGET_PARTS: usize = 4;

/// Built-in tool that runs a shell command in the session working directory.
pub struct BashTool {
    pub timeout_secs: u64,
    /// Byte budget for stdout/stderr returned to the model.
    pub max_output_bytes: usize,
    deny: Vec<Regex>,
}

impl BashTool {
    pub fn new(timeout_secs: u64, max_output_bytes: usize, deny_patterns: &[String]) -> Self {
        Self {
            timeout_secs,
            max_output_bytes,
            deny: deny_patterns.iter().filter_map(|p| glob_to_regex(p)).collect(),
        }
    }

    fn is_denied(&self, command: &str) -> bool {
        self.deny.iter().any(|re| re.is_match(command.trim()))
    }
}

impl Default for BashTool {
    fn default() -> Self {
        let defaults = freja_config::ToolsConfig::default();
        Self::new(
            defaults.bash_timeout_secs,
            defaults.bash_max_output_bytes,
            &defaults.deny_patterns,
        )
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         'command' is required and can be any bash one-liner.\n\
         Oversized output is trimmed in the middle; most of the byte budget\n\
         goes to the tail, so trailing errors and summaries survive.\n\
         Prefer non-interactive commands; avoid commands that require a TTY.\n\
         For large outputs (builds, test runs), pipe through `tail -200` or\n\
         `grep -E 'error:|warning:' 2>&1` to keep only what matters."
    }

    fn timeout_secs(&self) -> Option<u64> {
        // Slightly above the command ceiling so the tool's own timeout
        // message reaches the model instead of a generic integration cutoff.
        Some(MAX_TIMEOUT_SECS + 10)
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash one-liner to execute."
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional, max 600)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'command'"),
        };
        if self.is_denied(&command) {
            return ToolOutput::err(
                &call.id,
                format!("command refused by policy: {command}"),
            );
        }
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs)
            .min(MAX_TIMEOUT_SECS);

        debug!(cmd = %command, timeout, "executing bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        // stdin(null) keeps the child off the controlling terminal;
        // kill_on_drop makes the timeout and cancel paths reap it.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(wd) = &ctx.workdir {
            cmd.current_dir(wd);
        }

        let run = tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ToolOutput::err(&call.id, "cancelled");
            }
            r = run => r,
        };

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&trim_output(&stdout, self.max_output_bytes));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&trim_output(&stderr, self.max_output_bytes));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                let code = output.status.code().unwrap_or(-1);
                if code == 0 {
                    ToolOutput::ok(&call.id, content)
                } else if code == 1 {
                    // Exit code 1 is the Unix convention for "no matches"
                    // (grep/rg) and "condition false" (test) — not a hard
                    // failure.  Include the code for transparency.
                    ToolOutput::ok(&call.id, format!("[exit 1]\n{content}"))
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Trim `s` to roughly `limit` bytes by dropping lines from the middle.
///
/// One quarter of the budget goes to the head, three quarters to the tail.
/// Only whole lines are kept on either side of the `[trimmed …]` marker;
/// a single line larger than the whole budget keeps its tail end instead.
pub(crate) fn trim_output(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let head_budget = limit / BUDGET_PARTS;
    let tail_budget = limit / BUDGET_PARTS * TAIL_SHARE;

    // Whole head lines, in order, until the head budget runs out.
    let mut head_end = 0;
    let mut used = 0;
    for line in &lines {
        if used + line.len() + 1 > head_budget {
            break;
        }
        used += line.len() + 1;
        head_end += 1;
    }

    // Whole tail lines, scanning backward, until the tail budget runs out.
    let mut tail_start = lines.len();
    let mut used = 0;
    while tail_start > head_end {
        let line = lines[tail_start - 1];
        if used + line.len() + 1 > tail_budget {
            break;
        }
        used += line.len() + 1;
        tail_start -= 1;
    }

    if head_end == 0 && tail_start == lines.len() {
        // A single line blows the whole budget: keep its tail end.
        let mut cut = s.len().saturating_sub(tail_budget.max(1));
        while cut < s.len() && !s.is_char_boundary(cut) {
            cut += 1;
        }
        return format!("[trimmed {cut} leading bytes]\n{}", &s[cut..]);
    }

    let dropped = tail_start - head_end;
    format!(
        "{}\n[trimmed {dropped} of {} lines]\n{}",
        lines[..head_end].join("\n"),
        lines.len(),
        lines[tail_start..].join("\n"),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
