// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use freja_config::{AgentKind, AgentSettings, Config};
use freja_core::{Agent, MemoryHistory, TurnEvent, TurnOptions};
use freja_mcp_client::McpManager;
use freja_model::auth::CredentialsSink;
use freja_tools::{register_builtins, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Install the ring crypto provider before any TLS connection is made;
    // reqwest's rustls backend needs a process-wide default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    match cli.command {
        Commands::Chat {
            ref prompt,
            ref agent,
            ref provider,
            ref conversation,
            no_stream,
        } => {
            let config = freja_config::load(cli.config.as_deref())?;
            run_chat(
                &config,
                prompt,
                agent.as_deref(),
                provider.as_deref(),
                conversation.as_deref(),
                !no_stream,
            )
            .await
        }
        Commands::ListProviders => {
            for meta in freja_model::list_drivers() {
                let env = meta.default_api_key_env.unwrap_or("-");
                println!("{:<16} {:<16} {}  [{env}]", meta.id, meta.name, meta.description);
            }
            Ok(())
        }
        Commands::ListTools => {
            let config = freja_config::load(cli.config.as_deref())?;
            let mut registry = ToolRegistry::new();
            register_builtins(&mut registry, &config.tools);
            let mut manager = McpManager::new();
            manager
                .connect_all(
                    &config.mcp_servers,
                    config.runtime.mcp_handshake_timeout_secs,
                    config.runtime.request_timeout_secs,
                )
                .await;
            manager.register_tools(&mut registry);
            for schema in registry.schemas() {
                let first_line = schema.description.lines().next().unwrap_or("");
                println!("{:<16} {first_line}", schema.name);
            }
            manager.shutdown_all().await;
            Ok(())
        }
        Commands::ListMcp => {
            let config = freja_config::load(cli.config.as_deref())?;
            let mut manager = McpManager::new();
            manager
                .connect_all(
                    &config.mcp_servers,
                    config.runtime.mcp_handshake_timeout_secs,
                    config.runtime.request_timeout_secs,
                )
                .await;
            for cfg in &config.mcp_servers {
                match manager.get(&cfg.id) {
                    Some(client) => println!(
                        "{:<16} {:<8} {} tools",
                        cfg.id,
                        client.status().to_string(),
                        client.tools().len()
                    ),
                    None => println!("{:<16} unavailable", cfg.id),
                }
            }
            manager.shutdown_all().await;
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("FREJA_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the agent to run: a configured one, or a synthetic default over
/// the requested (or echo) provider so a bare `freja chat` works without a
/// config file.
fn resolve_agent(config: &Config, name: Option<&str>, provider: Option<&str>) -> AgentSettings {
    if provider.is_none() {
        if let Some(agent) = config.agent(name) {
            return agent.clone();
        }
    }
    AgentSettings {
        id: "default".into(),
        name: "Default".into(),
        kind: AgentKind::Local,
        provider: Some(provider.unwrap_or("echo").to_string()),
        url: None,
        auth_token: None,
        temperature: None,
        top_p: None,
        max_tokens: None,
        tools: config.tools.allow.clone(),
        system_prompt: None,
    }
}

async fn run_chat(
    config: &Config,
    prompt: &str,
    agent_name: Option<&str>,
    provider_override: Option<&str>,
    conversation: Option<&str>,
    streaming: bool,
) -> anyhow::Result<()> {
    let settings = resolve_agent(config, agent_name, provider_override);
    let kind = settings
        .provider
        .clone()
        .context("selected agent has no provider configured")?;
    if settings.kind == AgentKind::Remote {
        anyhow::bail!("remote agents are not runnable from the CLI");
    }

    let provider_cfg = config.providers.get(&kind).cloned().unwrap_or_default();
    let sink: CredentialsSink = Arc::new(|kind, creds| freja_config::save_credentials(kind, creds));
    let provider = freja_model::from_config(
        &kind,
        &provider_cfg,
        config.runtime.request_timeout_secs,
        sink,
    )?;

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry, &config.tools);
    let mut manager = McpManager::new();
    manager
        .connect_all(
            &config.mcp_servers,
            config.runtime.mcp_handshake_timeout_secs,
            config.runtime.request_timeout_secs,
        )
        .await;
    manager.register_tools(&mut registry);

    let agent = Agent::new(
        provider,
        Arc::new(registry),
        Arc::new(MemoryHistory::new()),
        settings,
        config.runtime.clone(),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let printer = tokio::spawn(async move {
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            match event {
                TurnEvent::Chunk { text, .. } => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                TurnEvent::ToolStarted { name, .. } => {
                    eprintln!("[tool] {name} …");
                }
                TurnEvent::ToolFinished { name, is_error, .. } => {
                    eprintln!("[tool] {name} {}", if is_error { "failed" } else { "done" });
                }
                TurnEvent::TurnFinal { message } => {
                    // Streaming already printed the text as chunks.
                    if let Some(text) = message.text() {
                        if !text.is_empty() {
                            println!();
                        }
                    }
                }
                TurnEvent::TurnError { kind, detail } => {
                    eprintln!("error ({kind}): {detail}");
                    failed = true;
                }
                TurnEvent::TurnCancelled => {
                    eprintln!("\ncancelled");
                }
                _ => {}
            }
        }
        failed
    });

    let mut options = TurnOptions::new(tx);
    options.streaming = streaming;
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let conversation_id = conversation
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let outcome = agent.send_turn(&conversation_id, prompt, options).await?;

    // In blocking mode nothing was streamed; print the final text now.
    if let freja_core::TurnOutcome::Completed(message) = &outcome {
        if !streaming {
            if let Some(text) = message.text() {
                println!("{text}");
            }
        }
    }

    let failed = printer.await.unwrap_or(false);
    manager.shutdown_all().await;
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
