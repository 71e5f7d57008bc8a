use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::identity::Scope;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    ErrorRate,
    ErrorCount,
    ConsecutiveFailures,
    ResponseTime,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::ErrorRate => "error_rate",
            RuleType::ErrorCount => "error_count",
            RuleType::ConsecutiveFailures => "consecutive_failures",
            RuleType::ResponseTime => "response_time",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule measures and the level at which it fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Failed share of all outcomes in the window, `0.0..=1.0`
    ErrorRate { threshold: f64 },
    /// Failures in the window, optionally only those of one error kind
    ErrorCount { threshold: u64, error_kind: Option<String> },
    /// The most recent `threshold` outcomes all failed
    ConsecutiveFailures { threshold: usize },
    /// Mean latency in the window, milliseconds
    ResponseTime { threshold_ms: f64 },
}

impl AlertCondition {
    pub fn rule_type(&self) -> RuleType {
        match self {
            AlertCondition::ErrorRate { .. } => RuleType::ErrorRate,
            AlertCondition::ErrorCount { .. } => RuleType::ErrorCount,
            AlertCondition::ConsecutiveFailures { .. } => RuleType::ConsecutiveFailures,
            AlertCondition::ResponseTime { .. } => RuleType::ResponseTime,
        }
    }

    pub fn threshold(&self) -> f64 {
        match self {
            AlertCondition::ErrorRate { threshold } => *threshold,
            AlertCondition::ErrorCount { threshold, .. } => *threshold as f64,
            AlertCondition::ConsecutiveFailures { threshold } => *threshold as f64,
            AlertCondition::ResponseTime { threshold_ms } => *threshold_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: AlertCondition,
    pub window_minutes: u32,
    pub cooldown_minutes: u32,
    pub enabled: bool,
    /// Restrict the rule to one scope; `None` watches all traffic
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// True while `now` is still inside the cooldown that started at the last trigger
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered {
            Some(last) => now < last + Duration::minutes(i64::from(self.cooldown_minutes)),
            None => false,
        }
    }

    /// Start of the trailing window evaluated at `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(i64::from(self.window_minutes))
    }
}

/// A fired rule. Acknowledgement is the only change ever made to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: String,
    pub rule_type: RuleType,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

impl Alert {
    pub fn new(rule: &AlertRule, value: f64, message: String, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id.clone(),
            rule_type: rule.condition.rule_type(),
            message,
            value,
            threshold: rule.condition.threshold(),
            triggered_at: at,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }

    pub fn acknowledge(&mut self, by: &str, at: DateTime<Utc>) -> Result<(), AlertError> {
        if self.acknowledged {
            return Err(AlertError::AlreadyAcknowledged(self.id));
        }
        self.acknowledged = true;
        self.acknowledged_at = Some(at);
        self.acknowledged_by = Some(by.to_string());
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(Uuid),

    #[error("alert {0} is already acknowledged")]
    AlreadyAcknowledged(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}
