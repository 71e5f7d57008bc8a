use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::notify::NotificationSink;
use super::rule::{Alert, AlertCondition, AlertRule};
use crate::background::BackgroundDispatcher;
use crate::clock::Clock;
use crate::store::{AlertStore, QuotaStore, StoreError};
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

/// A rule whose condition holds, with the measured value
struct Breach {
    value: f64,
    message: String,
}

/// Checks alert rules against the aggregated outcome log.
///
/// Reads only the store's aggregate views, never the limiter. Cycles are
/// serialized: a second call waits for the running one to finish.
pub struct AlertEvaluator {
    quota: Arc<dyn QuotaStore>,
    alerts: Arc<dyn AlertStore>,
    sink: Arc<dyn NotificationSink>,
    dispatcher: BackgroundDispatcher,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
    cycle: Mutex<()>,
}

impl AlertEvaluator {
    pub fn new(
        quota: Arc<dyn QuotaStore>,
        alerts: Arc<dyn AlertStore>,
        sink: Arc<dyn NotificationSink>,
        dispatcher: BackgroundDispatcher,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { quota, alerts, sink, dispatcher, clock, metrics, cycle: Mutex::new(()) }
    }

    /// Replace the stored rule set with `rules`, keeping the cooldown state of
    /// rules that already exist under the same id. Stored rules whose id is not
    /// in `rules` are deleted.
    pub async fn install_rules(&self, rules: Vec<AlertRule>) -> Result<usize, StoreError> {
        let existing = self.alerts.list_rules().await?;
        let count = rules.len();
        for stale in existing.iter().filter(|r| !rules.iter().any(|n| n.id == r.id)) {
            self.alerts.delete_rule(&stale.id).await?;
            info!(rule_id = %stale.id, "alert rule removed");
        }
        for mut rule in rules {
            if let Some(prev) = existing.iter().find(|r| r.id == rule.id) {
                rule.last_triggered = prev.last_triggered;
            }
            self.alerts.upsert_rule(&rule).await?;
        }
        info!(rules = count, "alert rules installed");
        Ok(count)
    }

    /// Run one evaluation cycle and return the alerts it raised.
    ///
    /// A rule whose reads fail is skipped for this cycle.
    pub async fn evaluate_alerts(&self) -> Vec<Alert> {
        let _cycle = self.cycle.lock().await;
        let now = self.clock.now();

        let rules = match self.alerts.list_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "could not load alert rules, skipping cycle");
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            if rule.in_cooldown(now) {
                debug!(rule_id = %rule.id, "alert rule in cooldown");
                continue;
            }

            match self.check(rule, now).await {
                Ok(Some(breach)) => {
                    if let Some(alert) = self.raise(rule, breach, now).await {
                        fired.push(alert);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "alert rule evaluation skipped");
                }
            }
        }

        debug!(rules = rules.len(), fired = fired.len(), "alert cycle finished");
        fired
    }

    async fn check(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<Option<Breach>, StoreError> {
        let scope = rule.scope.as_ref();
        let since = rule.window_start(now);
        let window = rule.window_minutes;

        let breach = match &rule.condition {
            AlertCondition::ErrorRate { threshold } => {
                let summary = self.summary(rule, since, now, None).await?;
                summary.error_rate().filter(|rate| rate >= threshold).map(|rate| Breach {
                    value: rate,
                    message: format!(
                        "error rate {:.1}% over the last {window}m ({} of {} requests failed)",
                        rate * 100.0,
                        summary.failed,
                        summary.total
                    ),
                })
            }
            AlertCondition::ErrorCount { threshold, error_kind } => {
                let summary = self.summary(rule, since, now, error_kind.as_deref()).await?;
                (summary.matching_errors >= *threshold).then(|| Breach {
                    value: summary.matching_errors as f64,
                    message: format!(
                        "{} {} errors over the last {window}m",
                        summary.matching_errors,
                        error_kind.as_deref().unwrap_or("request")
                    ),
                })
            }
            AlertCondition::ConsecutiveFailures { threshold } => {
                let recent = self
                    .quota
                    .recent_outcomes(scope, *threshold)
                    .await
                    .inspect_err(|_| self.store_error(values::OP_RECENT_OUTCOMES))?;
                let all_failed = *threshold > 0
                    && recent.len() >= *threshold
                    && recent.iter().all(|success| !success);
                all_failed.then(|| Breach {
                    value: *threshold as f64,
                    message: format!("last {threshold} requests failed"),
                })
            }
            AlertCondition::ResponseTime { threshold_ms } => {
                let summary = self.summary(rule, since, now, None).await?;
                summary
                    .mean_latency_ms()
                    .filter(|mean| mean >= threshold_ms)
                    .map(|mean| Breach {
                        value: mean,
                        message: format!(
                            "mean response time {mean:.0}ms over the last {window}m ({} requests)",
                            summary.total
                        ),
                    })
            }
        };
        Ok(breach)
    }

    async fn summary(
        &self,
        rule: &AlertRule,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        error_kind: Option<&str>,
    ) -> Result<crate::store::OutcomeSummary, StoreError> {
        self.quota
            .outcome_summary(rule.scope.as_ref(), since, now, error_kind)
            .await
            .inspect_err(|_| self.store_error(values::OP_OUTCOME_SUMMARY))
    }

    /// Persist the alert, start the cooldown and hand the alert to the sink.
    ///
    /// An alert whose cooldown could not be started stays persisted but is not
    /// reported or notified; the rule is checked again next cycle.
    async fn raise(&self, rule: &AlertRule, breach: Breach, now: DateTime<Utc>) -> Option<Alert> {
        let alert = Alert::new(rule, breach.value, breach.message, now);

        if let Err(e) = self.alerts.insert_alert(&alert).await {
            warn!(rule_id = %rule.id, error = %e, "could not persist alert");
            self.store_error(values::OP_ALERT_WRITE);
            return None;
        }
        if let Err(e) = self.alerts.mark_triggered(&rule.id, now).await {
            error!(
                rule_id = %rule.id,
                alert_id = %alert.id,
                error = %e,
                "could not start alert cooldown, notification withheld"
            );
            self.store_error(values::OP_ALERT_WRITE);
            return None;
        }

        info!(
            rule_id = %rule.id,
            rule = %rule.name,
            rule_type = %alert.rule_type,
            value = alert.value,
            threshold = alert.threshold,
            "alert raised"
        );
        if let Some(m) = &self.metrics {
            m.record_alert_fired(alert.rule_type.as_str());
        }

        let sink = Arc::clone(&self.sink);
        let metrics = self.metrics.clone();
        let delivered = alert.clone();
        self.dispatcher.dispatch(async move {
            if let Err(e) = sink.notify(&delivered).await {
                warn!(alert_id = %delivered.id, error = %e, "alert notification failed");
                if let Some(m) = metrics {
                    m.record_error(values::ERROR_NOTIFICATION);
                }
            }
        });

        Some(alert)
    }

    fn store_error(&self, operation: &str) {
        if let Some(m) = &self.metrics {
            m.record_store_error(operation);
        }
    }
}
