//! Quota store adapter.
//!
//! The store owns every piece of cross-request state: per-window counters,
//! the outcome log, alert rules and fired alerts. Counter atomicity is the
//! backend's job; nothing here takes an in-process lock around an await.

mod memory;
mod outcome;
mod redis_store;
mod timeout;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::{Alert, AlertError, AlertRule};
use crate::clock::Clock;
use crate::config::{StoreBackend, StoreConfig};
use crate::identity::Scope;
use crate::window::{PeriodKey, Window};

pub use memory::MemoryStore;
pub use outcome::{minute_of, MinuteBucket, OutcomeRecord, OutcomeSummary, AGGREGATE_HORIZON_MINUTES};
pub use redis_store::RedisStore;
pub use timeout::TimeoutStore;

/// How long a period lingers past its reset before it may expire
pub fn expiry_slack() -> Duration {
    Duration::days(1)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(StdDuration),

    #[error("corrupt store value: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Every store failure is handled as an outage by callers
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Corrupt(_) => true,
        }
    }
}

/// Counter address: `(scope, window, period)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub scope: Scope,
    pub window: Window,
    pub period: PeriodKey,
    /// When the backend may forget this counter
    pub expires_at: DateTime<Utc>,
}

impl CounterKey {
    /// Key of the bucket of `window` that `at` falls into
    pub fn at(scope: &Scope, window: Window, at: DateTime<Utc>, burst_window_secs: u64) -> Self {
        Self {
            scope: scope.clone(),
            window,
            period: window.period_key(at, burst_window_secs),
            expires_at: window.reset_at(at, burst_window_secs) + expiry_slack(),
        }
    }

    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{prefix}:quota:{}:{}:{}", self.scope, self.window, self.period)
    }
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically add `amount` and return the new value. A missing counter starts at 0.
    async fn increment(&self, key: &CounterKey, amount: u64) -> Result<u64, StoreError>;

    /// Snapshot read; 0 for a counter that does not exist.
    async fn read(&self, key: &CounterKey) -> Result<u64, StoreError>;

    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError>;

    /// Success flags of the latest `limit` outcomes, newest first.
    /// `None` reads the log across all scopes.
    async fn recent_outcomes(
        &self,
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError>;

    /// Aggregate of every outcome that finished in `[since, until]`, at minute
    /// granularity. Independent of the raw outcome retention; windows reach back
    /// at most [`AGGREGATE_HORIZON_MINUTES`].
    async fn outcome_summary(
        &self,
        scope: Option<&Scope>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        error_kind: Option<&str>,
    ) -> Result<OutcomeSummary, StoreError>;

    /// Drop counters whose `expires_at` has passed. Backends with native expiry do nothing.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(0)
    }
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<AlertRule>, StoreError>;

    async fn upsert_rule(&self, rule: &AlertRule) -> Result<(), StoreError>;

    /// Removing an unknown id is not an error
    async fn delete_rule(&self, rule_id: &str) -> Result<(), StoreError>;

    async fn mark_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Newest first
    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError>;

    /// Conditional update: succeeds only for an alert that is not yet acknowledged
    async fn acknowledge_alert(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, AlertError>;
}

/// Shared handles onto one backend, one per concern
#[derive(Clone)]
pub struct StoreHandles {
    pub quota: Arc<dyn QuotaStore>,
    pub alerts: Arc<dyn AlertStore>,
}

impl StoreHandles {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: QuotaStore + AlertStore + 'static,
    {
        Self { quota: store.clone(), alerts: store }
    }
}

/// Build the configured backend, every call bounded by `timeout_ms`
pub async fn connect(config: &StoreConfig) -> Result<StoreHandles, StoreError> {
    let timeout = StdDuration::from_millis(config.timeout_ms);
    match config.backend {
        StoreBackend::Memory => {
            info!(retention = config.outcome_retention, "using in-memory quota store");
            let store = MemoryStore::new(config.outcome_retention);
            Ok(StoreHandles::new(Arc::new(TimeoutStore::new(store, timeout))))
        }
        StoreBackend::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| StoreError::Unavailable("redis backend requires store.url".into()))?;
            let store = RedisStore::connect(url, &config.key_prefix, config.outcome_retention).await?;
            info!(prefix = %config.key_prefix, "connected to redis quota store");
            Ok(StoreHandles::new(Arc::new(TimeoutStore::new(store, timeout))))
        }
    }
}

/// Periodically purge expired counters until `token` is cancelled
pub fn spawn_janitor(
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    every: StdDuration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    match store.purge_expired(clock.now()).await {
                        Ok(0) => {}
                        Ok(purged) => debug!(purged, "purged expired counters"),
                        Err(e) => warn!(error = %e, "counter purge failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn storage_key_names_every_part() {
        let Some(at) = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 30).single() else { return };
        let key = CounterKey::at(&Scope::new("ip:203.0.113.5"), Window::Burst, at, 60);
        let expected = format!("sg:quota:ip:203.0.113.5:burst:b{}", at.timestamp() / 60);
        assert_eq!(key.storage_key("sg"), expected);
    }

    #[test]
    fn counters_outlive_their_period_by_the_slack() {
        let Some(at) = Utc.with_ymd_and_hms(2024, 6, 1, 10, 15, 0).single() else { return };
        let key = CounterKey::at(&Scope::new("account:a"), Window::Hourly, at, 60);
        assert_eq!(key.expires_at, Window::Hourly.reset_at(at, 60) + expiry_slack());
    }
}
