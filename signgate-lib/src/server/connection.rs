use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::telemetry::Metrics;

/// Errors that can occur when trying to accept a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Server is shutting down")]
    Shutdown,
    #[error("Connection limit exceeded (current: {current}, limit: {limit})")]
    LimitExceeded { current: usize, limit: usize },
}

/// Counts live client connections and reports when the last one closes
pub struct ConnectionManager {
    active_connections: Arc<AtomicUsize>,
    max_connections: usize,
    shutting_down: AtomicBool,
    connections_closed_tx: watch::Sender<()>,
    metrics: Option<Arc<Metrics>>,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, metrics: Option<Arc<Metrics>>) -> Self {
        let (connections_closed_tx, _) = watch::channel(());
        Self {
            active_connections: Arc::new(AtomicUsize::new(0)),
            max_connections,
            shutting_down: AtomicBool::new(false),
            connections_closed_tx,
            metrics,
        }
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Refuse every connection from now on
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    /// Try to accept a new connection
    /// Returns Ok(guard) if connection is accepted, Err(ConnectionError) if rejected
    pub fn try_accept(&self, peer: SocketAddr) -> Result<ConnectionGuard, ConnectionError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(ConnectionError::Shutdown);
        }

        let current = self.active_connections.load(Ordering::Relaxed);
        if current >= self.max_connections {
            if let Some(m) = &self.metrics {
                m.record_error("connection_limit");
            }
            warn!(current, limit = self.max_connections, peer = %peer, "Connection limit exceeded, rejecting connection");
            return Err(ConnectionError::LimitExceeded { current, limit: self.max_connections });
        }

        self.active_connections.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.connections_total.add(1, &[]);
            m.connections_active.add(1, &[]);
        }

        Ok(ConnectionGuard {
            counter: Arc::clone(&self.active_connections),
            notifier: self.connections_closed_tx.clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Wait until every connection has closed or `timeout` passes.
    /// Returns the number of connections still open.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let mut closed = self.connections_closed_tx.subscribe();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let active = self.active();
            if active == 0 {
                info!("All connections closed");
                return 0;
            }
            info!(active_connections = active, "Waiting for connections to close");

            tokio::select! {
                _ = closed.changed() => {}
                _ = &mut deadline => {
                    let active = self.active();
                    warn!(active_connections = active, "Shutdown timeout reached, {} connections still active", active);
                    return active;
                }
            }
        }
    }
}

/// Decrements the active connection count when dropped
/// and notifies when the last connection closes
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
    metrics: Option<Arc<Metrics>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.connections_active.add(-1, &[]);
        }
        if remaining == 1 {
            self.notifier.send_replace(());
        }
    }
}
