// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `faasrun serve` command - Start the provider.
//!
//! Connects to containerd, then serves deployment requests until Ctrl+C.
//! In-flight deployments are cancelled and cleaned up before exit.

use std::sync::Arc;

use thiserror::Error;

use faasrun_core::{
    Config, ConfigLoader, CtrClient, Dispatcher, NetnsHook, Orchestrator, RuntimeError,
    SpecBuilder,
};

use crate::server;

/// Environment variable naming the containerd socket.
const SOCKET_ENV: &str = "sock";

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("environment variable `{SOCKET_ENV}` is not set; it must name the containerd socket")]
    MissingSocket,

    #[error("cannot reach containerd: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("provider API failed: {0}")]
    Server(#[from] std::io::Error),
}

pub async fn execute(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    // Load and validate configuration - fail fast on invalid config
    let config = load_config(config_path)?;

    let address = std::env::var(SOCKET_ENV).map_err(|_| ServeError::MissingSocket)?;
    tracing::info!(socket = %address, namespace = %config.runtime.namespace, "Starting provider");

    let runtime = CtrClient::connect(address, &config.runtime)
        .await
        .map_err(ServeError::Runtime)?;

    if let Err(e) = NetnsHook::resolve(None) {
        tracing::warn!(error = %e, "Deployments will fail until the netns hook is installed");
    }

    let orchestrator = Orchestrator::new(
        Arc::new(runtime),
        SpecBuilder::new(),
        config.runtime.namespace.clone(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        orchestrator,
        config.runtime.default_registry.clone(),
        config.deploy.clone(),
    ));

    server::serve(Arc::clone(&dispatcher), &config.server, shutdown_signal())
        .await
        .map_err(ServeError::Server)?;

    tracing::info!(in_flight = dispatcher.in_flight(), "Shutting down provider");
    dispatcher.shutdown().await;
    tracing::info!("Provider stopped");

    Ok(())
}

fn load_config(config_path: Option<&str>) -> Result<Config, faasrun_core::FaasError> {
    match config_path {
        Some(path) => {
            tracing::info!(config = %path, "Loading configuration");
            ConfigLoader::load_file(path)
        }
        None => ConfigLoader::load_string(""),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
