use serde::Deserialize;

use crate::alerts::{AlertCondition, AlertRule, RuleType};
use crate::identity::Scope;
use crate::store::AGGREGATE_HORIZON_MINUTES;

/// Alert evaluation schedule, rules and delivery
#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    /// Run the periodic evaluator
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between evaluation cycles
    /// Default: 300 (5 minutes)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub rules: Vec<AlertRuleConfig>,
    /// Optional webhook that receives every fired alert as JSON
    /// Alerts are always written to the log as well
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { enabled: true, interval_secs: default_interval(), rules: Vec::new(), webhook: None }
    }
}

/// A rule as written in the config file
///
/// ```toml
/// [[alerts.rules]]
/// id = "signer-errors"
/// name = "Signer error rate"
/// type = "error_rate"
/// threshold = 0.25
/// window_minutes = 15
/// ```
#[derive(Debug, Deserialize, Clone)]
pub struct AlertRuleConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Rate in `0.0..=1.0`, a count, or milliseconds depending on `type`
    pub threshold: f64,
    /// Only count failures of this kind (`error_count` rules)
    #[serde(default)]
    pub error_kind: Option<String>,
    /// Default: 60
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    /// Default: 30
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Watch one scope such as "account:acme" instead of all traffic
    #[serde(default)]
    pub scope: Option<String>,
}

impl AlertRuleConfig {
    pub fn to_rule(&self) -> Result<AlertRule, String> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("alert rule {}: threshold must be a non-negative number", self.id));
        }
        if self.window_minutes == 0 || i64::from(self.window_minutes) > AGGREGATE_HORIZON_MINUTES {
            return Err(format!(
                "alert rule {}: window_minutes must be within 1..={AGGREGATE_HORIZON_MINUTES}",
                self.id
            ));
        }

        let condition = match self.rule_type {
            RuleType::ErrorRate => {
                if self.threshold > 1.0 {
                    return Err(format!(
                        "alert rule {}: error_rate threshold must be within 0.0..=1.0",
                        self.id
                    ));
                }
                AlertCondition::ErrorRate { threshold: self.threshold }
            }
            RuleType::ErrorCount => AlertCondition::ErrorCount {
                threshold: whole(self)? as u64,
                error_kind: self.error_kind.clone(),
            },
            RuleType::ConsecutiveFailures => {
                let n = whole(self)?;
                if n < 1.0 {
                    return Err(format!(
                        "alert rule {}: consecutive_failures threshold must be at least 1",
                        self.id
                    ));
                }
                AlertCondition::ConsecutiveFailures { threshold: n as usize }
            }
            RuleType::ResponseTime => AlertCondition::ResponseTime { threshold_ms: self.threshold },
        };

        Ok(AlertRule {
            id: self.id.clone(),
            name: self.name.clone(),
            condition,
            window_minutes: self.window_minutes,
            cooldown_minutes: self.cooldown_minutes,
            enabled: self.enabled,
            scope: self.scope.as_deref().map(Scope::new),
            last_triggered: None,
        })
    }
}

fn whole(rule: &AlertRuleConfig) -> Result<f64, String> {
    if rule.threshold.fract() != 0.0 {
        return Err(format!("alert rule {}: {} threshold must be a whole number", rule.id, rule.rule_type));
    }
    Ok(rule.threshold)
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as a bearer token when present
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Default: 5000
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    300
}

fn default_window_minutes() -> u32 {
    60
}

fn default_cooldown_minutes() -> u32 {
    30
}

fn default_webhook_timeout() -> u64 {
    5000
}
