//! Post-request quota accounting.
//!
//! Runs after the downstream call, off the response path. Every write is
//! best-effort: failures are logged and counted, never returned to the
//! request that triggered them. A retried write may count twice.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::background::BackgroundDispatcher;
use crate::identity::Identity;
use crate::limiter::TierTable;
use crate::store::{CounterKey, OutcomeRecord, QuotaStore};
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;
use crate::window::Window;

#[derive(Clone)]
pub struct QuotaAccountant {
    store: Arc<dyn QuotaStore>,
    tiers: TierTable,
    dispatcher: BackgroundDispatcher,
    metrics: Option<Arc<Metrics>>,
}

impl QuotaAccountant {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        tiers: TierTable,
        dispatcher: BackgroundDispatcher,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { store, tiers, dispatcher, metrics }
    }

    /// Queue the accounting of a finished request and return immediately.
    ///
    /// Returns false when the job was dropped because the queue was full.
    pub fn record(&self, identity: &Identity, outcome: OutcomeRecord) -> bool {
        let accountant = self.clone();
        let identity = identity.clone();
        self.dispatcher
            .dispatch(async move {
                accountant.record_now(&identity, outcome).await;
            })
    }

    /// Increment the counters of every window and append the outcome.
    ///
    /// Windows are bucketed by the outcome's timestamp, so a request that
    /// finishes after a boundary is charged to the new period. Returns true
    /// when every write landed.
    pub async fn record_now(&self, identity: &Identity, outcome: OutcomeRecord) -> bool {
        let scope = identity.scope();
        let burst_secs = self.tiers.for_tier(identity.effective_tier()).burst_window_secs;
        let mut complete = true;

        for window in Window::EVALUATION_ORDER {
            let key = CounterKey::at(&scope, window, outcome.timestamp, burst_secs);
            if let Err(e) = self.store.increment(&key, 1).await {
                complete = false;
                warn!(scope = %scope, window = %window, error = %e, "quota increment failed");
                self.store_error(values::OP_INCREMENT);
            }
        }

        if let Err(e) = self.store.append_outcome(&outcome).await {
            complete = false;
            warn!(scope = %scope, error = %e, "outcome append failed");
            self.store_error(values::OP_APPEND_OUTCOME);
        }

        if complete {
            debug!(scope = %scope, success = outcome.success, latency_ms = outcome.latency_ms, "request accounted");
            if let Some(m) = &self.metrics {
                m.record_accounting_write();
            }
        }
        complete
    }

    fn store_error(&self, operation: &str) {
        if let Some(m) = &self.metrics {
            m.record_store_error(operation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Scope;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::net::IpAddr;

    #[tokio::test]
    async fn charges_every_window_of_the_outcome_period() -> Result<(), crate::store::StoreError> {
        let store = Arc::new(MemoryStore::new(16));
        let (dispatcher, handle) = BackgroundDispatcher::spawn("accounting", 8, 1, None);
        let accountant =
            QuotaAccountant::new(store.clone(), TierTable::default(), dispatcher, None);

        let identity = Identity::Ip { address: IpAddr::from([198, 51, 100, 7]) };
        let Some(at) = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).single() else {
            return Ok(());
        };
        let outcome = OutcomeRecord::success(identity.scope(), at, 12);

        assert!(accountant.record_now(&identity, outcome).await);
        handle.shutdown().await;

        for window in Window::EVALUATION_ORDER {
            let key = CounterKey::at(&Scope::new("ip:198.51.100.7"), window, at, 60);
            assert_eq!(store.read(&key).await?, 1);
        }
        assert_eq!(store.recent_outcomes(Some(&identity.scope()), 5).await?, vec![true]);
        Ok(())
    }

    #[tokio::test]
    async fn queued_record_lands_after_shutdown() -> Result<(), crate::store::StoreError> {
        let store = Arc::new(MemoryStore::new(16));
        let (dispatcher, handle) = BackgroundDispatcher::spawn("accounting", 8, 2, None);
        let accountant =
            QuotaAccountant::new(store.clone(), TierTable::default(), dispatcher, None);

        let identity = Identity::Ip { address: IpAddr::from([198, 51, 100, 8]) };
        let now = Utc::now();
        assert!(accountant.record(&identity, OutcomeRecord::success(identity.scope(), now, 5)));
        handle.shutdown().await;

        let key = CounterKey::at(&identity.scope(), Window::Daily, now, 60);
        assert_eq!(store.read(&key).await?, 1);
        Ok(())
    }
}
