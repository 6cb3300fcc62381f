//! Background startup of the hub server for the engine binary.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError, start_server};
use crate::state::AppState;

/// Errors that can occur when spawning the hub server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the hub server on a background Tokio task.
///
/// The bind address is validated before spawning so obvious
/// misconfiguration surfaces at startup. The task runs until `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the configured address is invalid.
pub fn spawn_hub<F>(
    config: ServerConfig,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<JoinHandle<()>, StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.socket_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = start_server(&config, state, shutdown).await {
            tracing::error!(error = %e, "Hub server exited with error");
        }
    });

    tracing::info!(%addr, "Hub server spawned on background task");

    Ok(handle)
}
