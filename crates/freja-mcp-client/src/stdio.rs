// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Newline-delimited JSON-RPC over a child process's stdio.
//!
//! The transport spawns the server command, writes one JSON object per line
//! to its stdin, and parses its stdout line by line.  Lines that are not
//! JSON objects are server diagnostics and only logged.  stderr is drained
//! into the log.  Child exit surfaces as [`Incoming::Closed`] so the client
//! can reject pending requests.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{classify_line, Incoming, LineClass, McpError};
use crate::transport::McpTransport;

pub struct StdioTransport {
    outbound: mpsc::Sender<String>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Spawn `command` with `args`/`env` and wire its stdio.
    pub fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        incoming: mpsc::Sender<Incoming>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Spawn(format!("{command}: {e}")))?;

        let stdin = child.stdin.take().expect("child stdin was piped");
        let stdout = child.stdout.take().expect("child stdout was piped");
        let stderr = child.stderr.take().expect("child stderr was piped");

        // stderr is diagnostics only.
        let sid = server_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %sid, "mcp stderr: {line}");
            }
        });

        let transport = Self::wire(server_id, stdout, stdin, incoming);
        *transport.child.lock().expect("child lock poisoned") = Some(child);
        Ok(transport)
    }

    /// Build a transport over arbitrary reader/writer halves.
    ///
    /// Used by tests to drive the full framing path over in-memory duplex
    /// pipes, with a scripted peer on the other end.
    pub fn from_io(
        server_id: &str,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        incoming: mpsc::Sender<Incoming>,
    ) -> Self {
        Self::wire(server_id, reader, writer, incoming)
    }

    fn wire(
        server_id: &str,
        reader: impl AsyncRead + Send + Unpin + 'static,
        mut writer: impl AsyncWrite + Send + Unpin + 'static,
        incoming: mpsc::Sender<Incoming>,
    ) -> Self {
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(64);

        // Writer task: one JSON object per line.
        let sid = server_id.to_string();
        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    warn!(server = %sid, "mcp stdin write failed; stopping writer");
                    break;
                }
            }
        });

        // Reader task: classify each stdout line; EOF means the server is gone.
        let sid = server_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match classify_line(&line) {
                        LineClass::Message(msg) => {
                            if incoming.send(msg).await.is_err() {
                                break;
                            }
                        }
                        LineClass::Diagnostic => {
                            if !line.trim().is_empty() {
                                debug!(server = %sid, "mcp stdout (non-protocol): {line}");
                            }
                        }
                        LineClass::Dropped => {
                            debug!(server = %sid, "dropping unrecognised JSON-RPC message: {line}");
                        }
                    },
                    Ok(None) | Err(_) => {
                        let _ = incoming.send(Incoming::Closed).await;
                        break;
                    }
                }
            }
        });

        Self {
            outbound,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, payload: Value) -> Result<(), McpError> {
        self.outbound
            .send(payload.to_string())
            .await
            .map_err(|_| McpError::Closed)
    }

    async fn shutdown(&self) {
        let child = self.child.lock().expect("child lock poisoned").take();
        if let Some(mut child) = child {
            // kill() sends SIGKILL and reaps; kill_on_drop covers crash paths.
            let _ = child.kill().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::request;
    use serde_json::json;

    #[tokio::test]
    async fn sent_payloads_arrive_newline_delimited() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client_io);
        let (tx, _rx) = mpsc::channel(8);
        let t = StdioTransport::from_io("test", reader, writer, tx);

        t.send(request(1, "initialize", json!({}))).await.unwrap();
        t.send(request(2, "tools/list", json!({}))).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let mut collected = String::new();
        use tokio::io::AsyncReadExt;
        while !collected.contains("tools/list") {
            let n = server_io.read(&mut buf).await.unwrap();
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        let lines: Vec<&str> = collected.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], 1);
    }

    #[tokio::test]
    async fn server_lines_are_classified_and_forwarded() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client_io);
        let (tx, mut rx) = mpsc::channel(8);
        let _t = StdioTransport::from_io("test", reader, writer, tx);

        let (_srv_read, mut srv_write) = tokio::io::split(server_io);
        srv_write
            .write_all(
                b"starting up...\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n",
            )
            .await
            .unwrap();
        srv_write.flush().await.unwrap();

        // The diagnostic line is logged, not forwarded; the response arrives.
        match rx.recv().await.unwrap() {
            Incoming::Response { id, result } => {
                assert_eq!(id, 1);
                assert_eq!(result.unwrap()["ok"], true);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_emits_closed() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client_io);
        let (tx, mut rx) = mpsc::channel(8);
        let _t = StdioTransport::from_io("test", reader, writer, tx);

        drop(server_io);
        assert!(matches!(rx.recv().await.unwrap(), Incoming::Closed));
    }
}
