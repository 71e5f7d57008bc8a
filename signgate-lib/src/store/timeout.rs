use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::{AlertStore, CounterKey, OutcomeRecord, OutcomeSummary, QuotaStore, StoreError};
use crate::alerts::{Alert, AlertError, AlertRule};
use crate::identity::Scope;

/// Bounds every call on the wrapped store. Expiry surfaces as [`StoreError::Timeout`].
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout).into()),
        }
    }
}

#[async_trait]
impl<S: QuotaStore> QuotaStore for TimeoutStore<S> {
    async fn increment(&self, key: &CounterKey, amount: u64) -> Result<u64, StoreError> {
        self.bounded(self.inner.increment(key, amount)).await
    }

    async fn read(&self, key: &CounterKey) -> Result<u64, StoreError> {
        self.bounded(self.inner.read(key)).await
    }

    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError> {
        self.bounded(self.inner.append_outcome(outcome)).await
    }

    async fn recent_outcomes(
        &self,
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError> {
        self.bounded(self.inner.recent_outcomes(scope, limit)).await
    }

    async fn outcome_summary(
        &self,
        scope: Option<&Scope>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        error_kind: Option<&str>,
    ) -> Result<OutcomeSummary, StoreError> {
        self.bounded(self.inner.outcome_summary(scope, since, until, error_kind))
            .await
    }

    // Purging walks the whole keyspace, so it is left unbounded.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.purge_expired(now).await
    }
}

#[async_trait]
impl<S: AlertStore> AlertStore for TimeoutStore<S> {
    async fn list_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        self.bounded(self.inner.list_rules()).await
    }

    async fn upsert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        self.bounded(self.inner.upsert_rule(rule)).await
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), StoreError> {
        self.bounded(self.inner.delete_rule(rule_id)).await
    }

    async fn mark_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.bounded(self.inner.mark_triggered(rule_id, at)).await
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.bounded(self.inner.insert_alert(alert)).await
    }

    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.bounded(self.inner.list_alerts(limit)).await
    }

    async fn acknowledge_alert(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        self.bounded(self.inner.acknowledge_alert(id, by, at)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::window::Window;

    struct Stalled;

    #[async_trait]
    impl QuotaStore for Stalled {
        async fn increment(&self, _key: &CounterKey, _amount: u64) -> Result<u64, StoreError> {
            std::future::pending().await
        }

        async fn read(&self, _key: &CounterKey) -> Result<u64, StoreError> {
            std::future::pending().await
        }

        async fn append_outcome(&self, _outcome: &OutcomeRecord) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn recent_outcomes(
            &self,
            _scope: Option<&Scope>,
            _limit: usize,
        ) -> Result<Vec<bool>, StoreError> {
            std::future::pending().await
        }

        async fn outcome_summary(
            &self,
            _scope: Option<&Scope>,
            _since: DateTime<Utc>,
            _until: DateTime<Utc>,
            _error_kind: Option<&str>,
        ) -> Result<OutcomeSummary, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out() {
        let store = TimeoutStore::new(Stalled, Duration::from_millis(250));
        let key = CounterKey::at(&Scope::new("ip:1.2.3.4"), Window::Daily, Utc::now(), 60);

        let result = store.read(&key).await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(250))));
        assert!(result.err().is_some_and(|e| e.is_unavailable()));
    }

    #[tokio::test]
    async fn passes_through_fast_calls() -> Result<(), StoreError> {
        let store = TimeoutStore::new(MemoryStore::new(10), Duration::from_millis(250));
        let key = CounterKey::at(&Scope::new("ip:1.2.3.4"), Window::Daily, Utc::now(), 60);
        assert_eq!(store.increment(&key, 2).await?, 2);
        assert_eq!(store.inner().read(&key).await?, 2);
        Ok(())
    }
}
