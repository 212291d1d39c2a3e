// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Faasrun CLI
//!
//! Command-line interface and HTTP provider for the faasrun function
//! deployment backend.

use clap::{Parser, Subcommand};

mod commands;
mod server;

/// Faasrun - function container lifecycle manager for containerd
#[derive(Parser)]
#[command(name = "faasrun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the provider API against the containerd socket named by `sock`
    Serve,

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Serve => commands::serve::execute(cli.config.as_deref()).await,
        Commands::Validate { file } => commands::validate::execute(&file).await,
    }
}
