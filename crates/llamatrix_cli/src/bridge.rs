//! Wiring of the Matrix session, the Ollama client and the supervisor.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use llamatrix_core::{BridgeConfig, ContextStore, PromptGate, RoomSupervisor};
use llamatrix_matrix::{MatrixChat, MatrixLogin};
use llamatrix_ollama::OllamaClient;

/// Adapter events buffered before the sync loop waits on the supervisor.
const EVENT_BUFFER: usize = 1024;

/// Run the bridge until Ctrl-C or a fatal sync error.
pub async fn run(config: BridgeConfig) -> Result<()> {
    let backend = OllamaClient::new(&config.backend_url).context("Failed to create the Ollama client")?;
    info!("Using model {} at {}", config.model, backend.endpoint());

    let login = MatrixLogin {
        username: config.username.clone(),
        password: config.password.clone(),
        homeserver: config.homeserver.clone(),
    };
    let chat = MatrixChat::login(&login).await.context("Failed to log in to Matrix")?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let sync_token = chat
        .initial_sync(events_tx)
        .await
        .context("Initial Matrix sync failed")?;

    let mut supervisor = RoomSupervisor::new(
        Arc::new(chat.clone()),
        Arc::new(backend),
        Arc::new(ContextStore::new(config.trim_policy())),
        PromptGate::new(chat.user_id().clone(), &config.command_prefix),
        config.relay_config(),
    );
    supervisor
        .bootstrap()
        .await
        .context("Failed to list joined rooms")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    let sync = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = chat.sync(sync_token, shutdown.clone()).await;
            shutdown.cancel();
            result
        })
    };

    supervisor.run(events_rx, shutdown).await;
    sync.await
        .context("Sync task panicked")?
        .context("Matrix sync failed")?;

    info!("Bridge stopped");
    Ok(())
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Ctrl-C received, shutting down");
            shutdown.cancel();
        }
        Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
    }
}
