use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::evaluator::AlertEvaluator;

/// Runs the evaluator on a fixed interval.
///
/// Constructed and started explicitly by the process entry point. Ticks that
/// fall behind are skipped rather than bunched, so cycles never overlap.
pub struct AlertService {
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl AlertService {
    pub fn new(evaluator: Arc<AlertEvaluator>, interval: Duration) -> Self {
        Self { evaluator, interval, running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the timer. The first cycle runs one full interval after start.
    /// The service also stops when `parent` is cancelled.
    pub fn start(&mut self, parent: &CancellationToken) {
        if self.running.is_some() {
            warn!("alert service already running");
            return;
        }

        let token = parent.child_token();
        let evaluator = Arc::clone(&self.evaluator);
        let period = self.interval.max(Duration::from_secs(1));
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let fired = evaluator.evaluate_alerts().await;
                        if !fired.is_empty() {
                            info!(count = fired.len(), "alert cycle raised alerts");
                        }
                    }
                }
            }
        });

        info!(interval_secs = period.as_secs(), "alert service started");
        self.running = Some((token, task));
    }

    /// Cancel the timer and wait for an in-flight cycle to finish
    pub async fn stop(&mut self) {
        let Some((token, task)) = self.running.take() else {
            return;
        };
        token.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "alert service task failed");
        }
        info!("alert service stopped");
    }
}
