//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use signgate_lib::clock::ManualClock;
use signgate_lib::identity::{Identity, Scope, Tier};
use signgate_lib::limiter::{Limit, TierLimits, TierTable};
use signgate_lib::store::{
    CounterKey, MemoryStore, OutcomeRecord, OutcomeSummary, QuotaStore, StoreError,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> Result<DateTime<Utc>, String> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, s)
        .single()
        .ok_or_else(|| format!("invalid timestamp {y}-{m}-{d} {h}:{mi}:{s}"))
}

pub fn manual_clock(start: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start))
}

pub fn ip(address: &str) -> Result<Identity, std::net::AddrParseError> {
    Ok(Identity::Ip { address: address.parse::<IpAddr>()? })
}

pub fn account(account_id: &str) -> Identity {
    Identity::Account {
        account_id: account_id.to_string(),
        credential_id: format!("{account_id}-key"),
        tier: Tier::Free,
    }
}

/// Free tier with the given limits, unlimited tier unbounded
pub fn tiers(daily: u64, hourly: u64, burst: u64, burst_window_secs: u64) -> TierTable {
    TierTable {
        free: TierLimits {
            daily: Limit::Finite(daily),
            hourly: Limit::Finite(hourly),
            burst: Limit::Finite(burst),
            burst_window_secs,
        },
        unlimited: TierLimits::unbounded(),
    }
}

/// Memory store whose operations can be made to fail on demand
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_outcome_reads: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(1000),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_outcome_reads: AtomicBool::new(false),
        }
    }

    pub fn failing_reads() -> Self {
        let store = Self::new();
        store.fail_reads.store(true, Ordering::SeqCst);
        store
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected fault".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for FaultyStore {
    async fn increment(&self, key: &CounterKey, amount: u64) -> Result<u64, StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.increment(key, amount).await
    }

    async fn read(&self, key: &CounterKey) -> Result<u64, StoreError> {
        Self::check(&self.fail_reads)?;
        self.inner.read(key).await
    }

    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.append_outcome(outcome).await
    }

    async fn recent_outcomes(
        &self,
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError> {
        Self::check(&self.fail_outcome_reads)?;
        self.inner.recent_outcomes(scope, limit).await
    }

    async fn outcome_summary(
        &self,
        scope: Option<&Scope>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        error_kind: Option<&str>,
    ) -> Result<OutcomeSummary, StoreError> {
        Self::check(&self.fail_outcome_reads)?;
        self.inner.outcome_summary(scope, since, until, error_kind).await
    }
}
