use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::identity::Tier;
use crate::window::Window;

const UNBOUNDED: &str = "unbounded";

/// Quota of one window.
///
/// `Finite(0)` denies everything; only `Unbounded` disables the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    Finite(u64),
    Unbounded,
}

impl Limit {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Limit::Unbounded)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Finite(n) => write!(f, "{n}"),
            Limit::Unbounded => f.write_str(UNBOUNDED),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Finite(n) => serializer.serialize_u64(*n),
            Limit::Unbounded => serializer.serialize_str(UNBOUNDED),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u64),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(Limit::Finite(n)),
            Raw::Word(word) if word.eq_ignore_ascii_case(UNBOUNDED) => Ok(Limit::Unbounded),
            Raw::Word(word) => Err(serde::de::Error::custom(format!(
                "invalid limit '{word}', expected a non-negative integer or \"{UNBOUNDED}\""
            ))),
        }
    }
}

/// What is left in a window after a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    Count(u64),
    /// The window has no limit
    Unbounded,
    /// Not evaluated, either skipped after an earlier denial or unreadable
    Unknown,
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Count(n) => write!(f, "{n}"),
            Remaining::Unbounded => f.write_str(UNBOUNDED),
            Remaining::Unknown => f.write_str("unknown"),
        }
    }
}

/// Limits of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub daily: Limit,
    pub hourly: Limit,
    pub burst: Limit,
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
}

fn default_burst_window_secs() -> u64 {
    60
}

impl TierLimits {
    pub fn unbounded() -> Self {
        Self {
            daily: Limit::Unbounded,
            hourly: Limit::Unbounded,
            burst: Limit::Unbounded,
            burst_window_secs: default_burst_window_secs(),
        }
    }

    pub fn limit(&self, window: Window) -> Limit {
        match window {
            Window::Daily => self.daily,
            Window::Hourly => self.hourly,
            Window::Burst => self.burst,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        Window::EVALUATION_ORDER
            .iter()
            .all(|w| self.limit(*w).is_unbounded())
    }
}

fn default_free_limits() -> TierLimits {
    TierLimits {
        daily: Limit::Finite(100),
        hourly: Limit::Finite(20),
        burst: Limit::Finite(5),
        burst_window_secs: default_burst_window_secs(),
    }
}

/// Limits for every tier. Adding a tier means adding a field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_free_limits")]
    pub free: TierLimits,
    #[serde(default = "TierLimits::unbounded")]
    pub unlimited: TierLimits,
}

impl Default for TierTable {
    fn default() -> Self {
        Self { free: default_free_limits(), unlimited: TierLimits::unbounded() }
    }
}

impl TierTable {
    pub fn for_tier(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Unlimited => &self.unlimited,
        }
    }
}

/// What to do with a window whose counter cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the window as not exhausted and mark the decision degraded
    #[default]
    Open,
    /// Deny on the window and mark the decision degraded
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailurePolicies {
    #[serde(default)]
    pub daily: FailurePolicy,
    #[serde(default)]
    pub hourly: FailurePolicy,
    #[serde(default)]
    pub burst: FailurePolicy,
}

impl FailurePolicies {
    pub fn for_window(&self, window: Window) -> FailurePolicy {
        match window {
            Window::Daily => self.daily,
            Window::Hourly => self.hourly,
            Window::Burst => self.burst,
        }
    }
}
