use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Scope;

/// One finished request. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub scope: Scope,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub error_kind: Option<String>,
}

impl OutcomeRecord {
    pub fn success(scope: Scope, timestamp: DateTime<Utc>, latency_ms: u64) -> Self {
        Self { scope, timestamp, success: true, latency_ms, error_kind: None }
    }

    pub fn failure(
        scope: Scope,
        timestamp: DateTime<Utc>,
        latency_ms: u64,
        error_kind: impl Into<String>,
    ) -> Self {
        Self { scope, timestamp, success: false, latency_ms, error_kind: Some(error_kind.into()) }
    }
}

/// Oldest minute an outcome aggregate can still be read for
pub const AGGREGATE_HORIZON_MINUTES: i64 = 24 * 60;

/// Outcome aggregates are bucketed per UTC minute
pub fn minute_of(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

/// Totals of the outcomes that finished within one UTC minute.
///
/// Windowed aggregates are sums of these buckets, so they do not depend on
/// how many raw outcomes the store keeps.
#[derive(Debug, Clone, Default)]
pub struct MinuteBucket {
    pub total: u64,
    pub failed: u64,
    pub latency_ms: u64,
    pub failures_by_kind: AHashMap<String, u64>,
}

impl MinuteBucket {
    pub(crate) const TOTAL: &'static str = "total";
    pub(crate) const FAILED: &'static str = "failed";
    pub(crate) const LATENCY_MS: &'static str = "latency_ms";
    pub(crate) const KIND_PREFIX: &'static str = "kind:";

    pub fn add(&mut self, outcome: &OutcomeRecord) {
        self.total += 1;
        self.latency_ms = self.latency_ms.saturating_add(outcome.latency_ms);
        if outcome.success {
            return;
        }
        self.failed += 1;
        if let Some(kind) = &outcome.error_kind {
            *self.failures_by_kind.entry(kind.clone()).or_default() += 1;
        }
    }

    /// Rebuild a bucket from its hash fields (`total`, `failed`, `latency_ms`, `kind:<error kind>`)
    pub fn from_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut bucket = Self::default();
        for (field, value) in fields {
            match field.as_str() {
                Self::TOTAL => bucket.total = value,
                Self::FAILED => bucket.failed = value,
                Self::LATENCY_MS => bucket.latency_ms = value,
                other => {
                    if let Some(kind) = other.strip_prefix(Self::KIND_PREFIX) {
                        bucket.failures_by_kind.insert(kind.to_string(), value);
                    }
                }
            }
        }
        bucket
    }
}

/// Aggregate over the outcomes in a trailing window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutcomeSummary {
    pub total: u64,
    pub failed: u64,
    /// Failures whose error kind matched the requested one (all failures when none was requested)
    pub matching_errors: u64,
    pub total_latency_ms: u64,
}

impl OutcomeSummary {
    pub fn merge(&mut self, bucket: &MinuteBucket, error_kind: Option<&str>) {
        self.total += bucket.total;
        self.failed += bucket.failed;
        self.total_latency_ms = self.total_latency_ms.saturating_add(bucket.latency_ms);
        self.matching_errors += match error_kind {
            Some(kind) => bucket.failures_by_kind.get(kind).copied().unwrap_or(0),
            None => bucket.failed,
        };
    }

    pub fn error_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.failed as f64 / self.total as f64)
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        (self.total > 0).then(|| self.total_latency_ms as f64 / self.total as f64)
    }
}
