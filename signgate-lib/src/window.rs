//! Quota windows and their fixed calendar buckets.
//!
//! All three windows are fixed buckets aligned to UTC boundaries:
//! daily buckets start at midnight, hourly buckets at the top of the hour and
//! burst buckets at multiples of `burst_window_secs` since the Unix epoch.
//! A caller can therefore spend up to twice the burst limit across a bucket
//! boundary; that is the known cost of not tracking a sliding window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

/// Granularity over which a quota is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Daily,
    Hourly,
    Burst,
}

impl Window {
    /// Coarsest first. Denial short-circuits on the first window that is full.
    pub const EVALUATION_ORDER: [Window; 3] = [Window::Daily, Window::Hourly, Window::Burst];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Daily => "daily",
            Window::Hourly => "hourly",
            Window::Burst => "burst",
        }
    }

    /// Length of one bucket of this window
    pub fn length(&self, burst_window_secs: u64) -> Duration {
        match self {
            Window::Daily => Duration::seconds(SECS_PER_DAY),
            Window::Hourly => Duration::seconds(SECS_PER_HOUR),
            Window::Burst => Duration::seconds(burst_secs(burst_window_secs)),
        }
    }

    /// Identifies the bucket `at` falls into
    pub fn period_key(&self, at: DateTime<Utc>, burst_window_secs: u64) -> PeriodKey {
        let key = match self {
            Window::Daily => at.format("%Y-%m-%d").to_string(),
            Window::Hourly => at.format("%Y-%m-%dT%H").to_string(),
            Window::Burst => {
                format!("b{}", at.timestamp().div_euclid(burst_secs(burst_window_secs)))
            }
        };
        PeriodKey(key)
    }

    /// First instant of the bucket after the one `at` falls into
    pub fn reset_at(&self, at: DateTime<Utc>, burst_window_secs: u64) -> DateTime<Utc> {
        let span = self.length(burst_window_secs).num_seconds();
        let next = at
            .timestamp()
            .div_euclid(span)
            .saturating_add(1)
            .saturating_mul(span);
        DateTime::from_timestamp(next, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn burst_secs(burst_window_secs: u64) -> i64 {
    i64::try_from(burst_window_secs.max(1)).unwrap_or(i64::MAX)
}

/// Calendar date, hour bucket or burst bucket index of a counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
