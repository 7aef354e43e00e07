// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Arithmetic expression evaluator: `+ - * / %`, `^` (power), parentheses,
/// unary minus.  Evaluated over f64.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression.  Supports + - * / % ^ and\n\
         parentheses, e.g. \"(2 + 3) * 4 ^ 2\"."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": { "type": "string", "description": "Expression to evaluate" }
            },
            "required": ["expression"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        _cancel: &CancellationToken,
    ) -> ToolOutput {
        let Some(expr) = call.args.get("expression").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'expression'");
        };
        match eval(expr) {
            Ok(v) => {
                // Render integers without a trailing ".0".
                let rendered = if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", v as i64)
                } else {
                    format!("{v}")
                };
                ToolOutput::ok(&call.id, rendered)
            }
            Err(e) => ToolOutput::err(&call.id, format!("cannot evaluate {expr:?}: {e}")),
        }
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

/// Evaluate an arithmetic expression.
pub(crate) fn eval(expr: &str) -> Result<f64, String> {
    let mut p = Parser { chars: expr.chars().peekable() };
    let v = p.expression()?;
    p.skip_ws();
    match p.chars.peek() {
        None => Ok(v),
        Some(c) => Err(format!("unexpected character {c:?}")),
    }
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    acc += self.term()?;
                }
                Some('-') => {
                    self.chars.next();
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    // term := power (('*' | '/' | '%') power)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.power()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    acc *= self.power()?;
                }
                Some('/') => {
                    self.chars.next();
                    let rhs = self.power()?;
                    if rhs == 0.0 {
                        return Err("division by zero".into());
                    }
                    acc /= rhs;
                }
                Some('%') => {
                    self.chars.next();
                    let rhs = self.power()?;
                    if rhs == 0.0 {
                        return Err("division by zero".into());
                    }
                    acc %= rhs;
                }
                _ => return Ok(acc),
            }
        }
    }

    // power := atom ('^' power)?   — right-associative
    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        self.skip_ws();
        if let Some('^') = self.chars.peek() {
            self.chars.next();
            let exp = self.power()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    // atom := number | '(' expression ')' | '-' atom
    fn atom(&mut self) -> Result<f64, String> {
        self.skip_ws();
        match self.chars.peek() {
            Some('(') => {
                self.chars.next();
                let v = self.expression()?;
                self.skip_ws();
                match self.chars.next() {
                    Some(')') => Ok(v),
                    _ => Err("missing closing parenthesis".into()),
                }
            }
            Some('-') => {
                self.chars.next();
                Ok(-self.atom()?)
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.number(),
            Some(c) => Err(format!("unexpected character {c:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.' || *c == 'e' || *c == 'E')
        {
            s.push(self.chars.next().unwrap());
        }
        s.parse::<f64>().map_err(|_| format!("invalid number {s:?}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
