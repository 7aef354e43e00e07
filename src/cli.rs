// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "freja", version, about = "Terminal AI agent runtime with tool calling and MCP support")]
pub struct Cli {
    /// Explicit config file (merged on top of the discovered layers)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (overrides FREJA_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and stream the assistant reply to stdout
    Chat {
        /// The user message
        prompt: String,
        /// Agent to use (defaults to the configured default agent)
        #[arg(long)]
        agent: Option<String>,
        /// Provider kind override (e.g. "openrouter", "echo")
        #[arg(long)]
        provider: Option<String>,
        /// Conversation id to continue (fresh UUID when omitted)
        #[arg(long)]
        conversation: Option<String>,
        /// Disable streaming; print only the final reply
        #[arg(long)]
        no_stream: bool,
    },
    /// List all supported model providers
    ListProviders,
    /// List the tools available with the current configuration
    ListTools,
    /// Connect configured MCP servers and report their status and tools
    ListMcp,
}
