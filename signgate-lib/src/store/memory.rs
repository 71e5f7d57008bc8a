use ahash::{AHashMap, RandomState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::outcome::{minute_of, MinuteBucket, AGGREGATE_HORIZON_MINUTES};
use super::{AlertStore, CounterKey, OutcomeRecord, OutcomeSummary, QuotaStore, StoreError};
use crate::alerts::{Alert, AlertError, AlertRule};
use crate::identity::Scope;

const SHARDS: usize = 16;
const MAX_ALERTS: usize = 10_000;

struct Cell {
    count: AtomicU64,
    expires_at: DateTime<Utc>,
}

type Shard = RwLock<AHashMap<CounterKey, Cell>>;

type Buckets = BTreeMap<i64, MinuteBucket>;

/// Raw outcomes are capped at `retention`; the per-minute buckets cover the
/// aggregate horizon no matter how many outcomes arrive.
#[derive(Default)]
struct OutcomeLog {
    global: VecDeque<OutcomeRecord>,
    by_scope: AHashMap<Scope, VecDeque<OutcomeRecord>>,
    global_buckets: Buckets,
    scope_buckets: AHashMap<Scope, Buckets>,
}

/// Process-local store for single-instance deployments and tests.
///
/// Counters live in sharded maps of atomic cells: an increment takes a shard
/// read lock and does a `fetch_add`, so concurrent increments of the same
/// counter never lose updates and no lock outlives the call.
pub struct MemoryStore {
    shards: Vec<Shard>,
    hasher: RandomState,
    retention: usize,
    outcomes: RwLock<OutcomeLog>,
    rules: RwLock<AHashMap<String, AlertRule>>,
    alerts: RwLock<VecDeque<Alert>>,
}

impl MemoryStore {
    /// `retention` bounds each outcome list (per scope and global)
    pub fn new(retention: usize) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(AHashMap::new())).collect(),
            hasher: RandomState::new(),
            retention: retention.max(1),
            outcomes: RwLock::new(OutcomeLog::default()),
            rules: RwLock::new(AHashMap::new()),
            alerts: RwLock::new(VecDeque::new()),
        }
    }

    fn shard(&self, key: &CounterKey) -> &Shard {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Number of live counters across all shards
    pub fn counter_count(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.read().ok().map(|m| m.len()))
            .sum()
    }
}

fn read_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable(format!("{what} lock poisoned")))
}

fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    what: &str,
) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable(format!("{what} lock poisoned")))
}

fn sum_buckets(
    buckets: &Buckets,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    error_kind: Option<&str>,
) -> OutcomeSummary {
    let (first, last) = (minute_of(since), minute_of(until));
    let mut summary = OutcomeSummary::default();
    if first > last {
        return summary;
    }
    for bucket in buckets.range(first..=last).map(|(_, b)| b) {
        summary.merge(bucket, error_kind);
    }
    summary
}

fn push_bounded(list: &mut VecDeque<OutcomeRecord>, outcome: OutcomeRecord, retention: usize) {
    list.push_front(outcome);
    list.truncate(retention);
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn increment(&self, key: &CounterKey, amount: u64) -> Result<u64, StoreError> {
        let shard = self.shard(key);
        {
            let cells = read_lock(shard, "counter")?;
            if let Some(cell) = cells.get(key) {
                return Ok(cell.count.fetch_add(amount, Ordering::AcqRel).saturating_add(amount));
            }
        }

        let mut cells = write_lock(shard, "counter")?;
        let cell = cells.entry(key.clone()).or_insert_with(|| Cell {
            count: AtomicU64::new(0),
            expires_at: key.expires_at,
        });
        Ok(cell.count.fetch_add(amount, Ordering::AcqRel).saturating_add(amount))
    }

    async fn read(&self, key: &CounterKey) -> Result<u64, StoreError> {
        let cells = read_lock(self.shard(key), "counter")?;
        Ok(cells
            .get(key)
            .map(|cell| cell.count.load(Ordering::Acquire))
            .unwrap_or(0))
    }

    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError> {
        let mut log = write_lock(&self.outcomes, "outcome")?;
        push_bounded(&mut log.global, outcome.clone(), self.retention);
        let retention = self.retention;
        let list = log.by_scope.entry(outcome.scope.clone()).or_default();
        push_bounded(list, outcome.clone(), retention);

        let minute = minute_of(outcome.timestamp);
        log.global_buckets.entry(minute).or_default().add(outcome);
        log.scope_buckets
            .entry(outcome.scope.clone())
            .or_default()
            .entry(minute)
            .or_default()
            .add(outcome);
        Ok(())
    }

    async fn recent_outcomes(
        &self,
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError> {
        let log = read_lock(&self.outcomes, "outcome")?;
        let list = match scope {
            Some(scope) => log.by_scope.get(scope),
            None => Some(&log.global),
        };
        Ok(list
            .map(|l| l.iter().take(limit).map(|o| o.success).collect())
            .unwrap_or_default())
    }

    async fn outcome_summary(
        &self,
        scope: Option<&Scope>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        error_kind: Option<&str>,
    ) -> Result<OutcomeSummary, StoreError> {
        let log = read_lock(&self.outcomes, "outcome")?;
        let buckets = match scope {
            Some(scope) => log.scope_buckets.get(scope),
            None => Some(&log.global_buckets),
        };
        Ok(buckets
            .map(|b| sum_buckets(b, since, until, error_kind))
            .unwrap_or_default())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut purged = 0;
        for shard in &self.shards {
            let mut cells = write_lock(shard, "counter")?;
            let before = cells.len();
            cells.retain(|_, cell| cell.expires_at > now);
            purged += before - cells.len();
        }

        let cutoff = now - super::expiry_slack();
        let mut log = write_lock(&self.outcomes, "outcome")?;
        log.by_scope
            .retain(|_, list| list.front().is_some_and(|newest| newest.timestamp >= cutoff));

        let oldest = minute_of(now) - AGGREGATE_HORIZON_MINUTES;
        log.global_buckets = log.global_buckets.split_off(&oldest);
        log.scope_buckets.retain(|_, buckets| {
            *buckets = buckets.split_off(&oldest);
            !buckets.is_empty()
        });

        Ok(purged)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let rules = read_lock(&self.rules, "rule")?;
        let mut rules: Vec<AlertRule> = rules.values().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn upsert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let mut rules = write_lock(&self.rules, "rule")?;
        rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), StoreError> {
        let mut rules = write_lock(&self.rules, "rule")?;
        rules.remove(rule_id);
        Ok(())
    }

    async fn mark_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut rules = write_lock(&self.rules, "rule")?;
        match rules.get_mut(rule_id) {
            Some(rule) => {
                rule.last_triggered = Some(at);
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("unknown alert rule {rule_id}"))),
        }
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut alerts = write_lock(&self.alerts, "alert")?;
        alerts.push_front(alert.clone());
        alerts.truncate(MAX_ALERTS);
        Ok(())
    }

    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let alerts = read_lock(&self.alerts, "alert")?;
        Ok(alerts.iter().take(limit).cloned().collect())
    }

    async fn acknowledge_alert(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        let mut alerts = write_lock(&self.alerts, "alert")?;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AlertError::NotFound(id))?;
        alert.acknowledge(by, at)?;
        Ok(alert.clone())
    }
}
