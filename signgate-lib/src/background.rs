//! Best-effort background work.
//!
//! Side effects that must never hold up a response (quota accounting,
//! credential last-used updates, alert notifications) are queued here and run
//! on a small pool of worker tasks. Jobs are dropped when the queue is full
//! and lost if the process dies before a worker picks them up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::telemetry::Metrics;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cheap to clone; every clone feeds the same queue
#[derive(Clone)]
pub struct BackgroundDispatcher {
    name: &'static str,
    tx: mpsc::Sender<Job>,
    metrics: Option<Arc<Metrics>>,
}

/// Owns the worker tasks of a dispatcher
pub struct DispatcherHandle {
    name: &'static str,
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundDispatcher {
    /// Spawn `workers` tasks draining a queue of `capacity` jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        name: &'static str,
        capacity: usize,
        workers: usize,
        metrics: Option<Arc<Metrics>>,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let token = CancellationToken::new();

        let workers = (0..workers.max(1))
            .map(|_| tokio::spawn(worker_loop(Arc::clone(&rx), token.clone())))
            .collect();

        (Self { name, tx, metrics }, DispatcherHandle { name, token, workers })
    }

    /// Queue a job without waiting. Returns false when the job was dropped.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tx.try_send(Box::pin(job)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(dispatcher = self.name, "background queue full, dropping job");
                if let Some(m) = &self.metrics {
                    m.record_background_drop(self.name);
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(dispatcher = self.name, "background queue closed, dropping job");
                if let Some(m) = &self.metrics {
                    m.record_background_drop(self.name);
                }
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl DispatcherHandle {
    /// Stop accepting work once the queue is empty and wait for the workers.
    ///
    /// Jobs already queued when this is called still run.
    pub async fn shutdown(self) {
        self.token.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(dispatcher = self.name, error = %e, "background worker panicked");
            }
        }
        debug!(dispatcher = self.name, "background dispatcher drained");
    }
}

async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Job>>>, token: CancellationToken) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                job = rx.recv() => job,
                _ = token.cancelled() => rx.try_recv().ok(),
            }
        };

        match job {
            Some(job) => job.await,
            None => break,
        }
    }
}
