use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::limits::{Limit, Remaining};
use crate::identity::{Scope, Tier};
use crate::window::Window;

/// State of one window as seen by a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub window: Window,
    #[serde(skip)]
    pub limit: Limit,
    /// Counter value read for this decision, if it was read
    pub used: Option<u64>,
    pub remaining: Remaining,
    pub reset_at: DateTime<Utc>,
}

impl WindowStatus {
    pub(crate) fn unevaluated(window: Window, limit: Limit, reset_at: DateTime<Utc>) -> Self {
        let remaining = match limit {
            Limit::Unbounded => Remaining::Unbounded,
            Limit::Finite(_) => Remaining::Unknown,
        };
        Self { window, limit, used: None, remaining, reset_at }
    }
}

/// Outcome of one limiter evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub scope: Scope,
    pub tier: Tier,
    /// Daily, hourly, burst
    pub windows: [WindowStatus; 3],
    /// Set exactly when `allowed` is false
    pub denied_reason: Option<Window>,
    /// A counter could not be read and the window's failure policy decided instead
    pub degraded: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    pub fn window(&self, window: Window) -> &WindowStatus {
        &self.windows[slot(window)]
    }

    pub fn remaining(&self, window: Window) -> Remaining {
        self.window(window).remaining
    }

    pub fn reset_at(&self, window: Window) -> DateTime<Utc> {
        self.window(window).reset_at
    }

    /// Window to report to the caller: the denying window, otherwise the
    /// finite window with the least remaining (earliest reset on ties).
    pub fn tightest(&self) -> Option<&WindowStatus> {
        if let Some(window) = self.denied_reason {
            return Some(self.window(window));
        }
        self.windows
            .iter()
            .filter_map(|s| match s.remaining {
                Remaining::Count(n) => Some((n, s)),
                Remaining::Unbounded | Remaining::Unknown => None,
            })
            .min_by(|(a, sa), (b, sb)| a.cmp(b).then(sa.reset_at.cmp(&sb.reset_at)))
            .map(|(_, s)| s)
    }

    pub fn into_result(self) -> Result<Decision, RateLimitError> {
        match self.denied_reason {
            None => Ok(self),
            Some(window) => Err(RateLimitError::Exceeded {
                window,
                reset_at: self.reset_at(window),
                decision: Box::new(self),
            }),
        }
    }
}

pub(crate) fn slot(window: Window) -> usize {
    match window {
        Window::Daily => 0,
        Window::Hourly => 1,
        Window::Burst => 2,
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("{window} limit exceeded, resets at {reset_at}")]
    Exceeded { window: Window, reset_at: DateTime<Utc>, decision: Box<Decision> },
}
