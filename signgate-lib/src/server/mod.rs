//! HTTP front of the gateway.

pub mod connection;
mod handler;
mod http_result;
mod responses;
mod signer;
mod transport;

pub use connection::{ConnectionError, ConnectionGuard, ConnectionManager};
pub use handler::{handle_request, ServerState, ERROR_KIND_SIGNER_STATUS};
pub use http_result::HttpError;
pub use signer::SignerClient;

use hyper_util::rt::TokioExecutor;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GatewayError, Result};

/// Limits applied by the accept loop
#[derive(Debug, Clone, Copy)]
pub struct ServeOptions {
    pub max_connections: usize,
    pub connection_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ServeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_connections: config.max_connections,
            connection_timeout: Duration::from_secs(config.timeout.connection_handling_secs),
            shutdown_timeout: Duration::from_secs(config.timeout.shutdown_secs),
        }
    }
}

/// Bind `config.listen` and serve until `shutdown` is cancelled
pub async fn run(config: &Config, state: Arc<ServerState>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(config.listen).await.map_err(GatewayError::Io)?;
    serve(listener, state, ServeOptions::from_config(config), shutdown).await
}

/// Accept loop over an already bound listener.
///
/// On shutdown, stops accepting, lets open connections finish their
/// in-flight requests and waits up to `shutdown_timeout` for them to close.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    options: ServeOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    let builder = ConnBuilder::new(TokioExecutor::new());
    let connections = ConnectionManager::new(options.max_connections, state.metrics.clone());

    info!(addr = ?listener.local_addr().ok(), signer = state.signer.address(), "starting signing gateway (h1/h2)");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, no longer accepting connections");
                connections.begin_shutdown();
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                let guard = match connections.try_accept(peer) {
                    Ok(guard) => guard,
                    Err(e) => {
                        debug!(?peer, error = %e, "connection rejected");
                        continue;
                    }
                };

                let builder = builder.clone();
                let state = Arc::clone(&state);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    transport::serve_connection(builder, stream, peer, state, options.connection_timeout, shutdown).await;
                });
            }
        }
    }

    info!("Waiting for active connections to finish (timeout: {}s)", options.shutdown_timeout.as_secs());
    connections.drain(options.shutdown_timeout).await;

    info!("Gateway server stopped");
    Ok(())
}

/// Resolve on the first SIGTERM or SIGINT
pub async fn shutdown_signal() -> Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        GatewayError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        GatewayError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
    Ok(())
}
