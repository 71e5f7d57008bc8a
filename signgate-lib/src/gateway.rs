//! The four operations the request-handling layer and the alert scheduler
//! call into.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::accounting::QuotaAccountant;
use crate::alerts::{
    Alert, AlertError, AlertEvaluator, FanoutNotificationSink, LogNotificationSink,
    NotificationSink, WebhookNotificationSink,
};
use crate::background::BackgroundDispatcher;
use crate::clock::Clock;
use crate::config::Config;
use crate::identity::{
    AuthError, CredentialValidator, Identity, IdentityResolver, RequestMetadata,
    StaticCredentialValidator,
};
use crate::limiter::{Decision, RateLimiter};
use crate::store::{AlertStore, OutcomeRecord, StoreHandles};
use crate::telemetry::Metrics;

pub struct Gateway {
    resolver: IdentityResolver,
    limiter: RateLimiter,
    accountant: QuotaAccountant,
    evaluator: Arc<AlertEvaluator>,
    alerts: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn new(
        resolver: IdentityResolver,
        limiter: RateLimiter,
        accountant: QuotaAccountant,
        evaluator: Arc<AlertEvaluator>,
        alerts: Arc<dyn AlertStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { resolver, limiter, accountant, evaluator, alerts, clock }
    }

    /// Wire every component from configuration.
    ///
    /// `background` carries accounting, last-used touches and alert delivery.
    pub fn from_config(
        config: &Config,
        stores: &StoreHandles,
        background: BackgroundDispatcher,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let validator: Arc<dyn CredentialValidator> =
            Arc::new(StaticCredentialValidator::new(&config.credentials));
        Self::with_validator(config, stores, validator, background, clock, metrics)
    }

    /// Same as [`Gateway::from_config`] with an externally supplied validator
    pub fn with_validator(
        config: &Config,
        stores: &StoreHandles,
        validator: Arc<dyn CredentialValidator>,
        background: BackgroundDispatcher,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let resolver = IdentityResolver::new(
            validator,
            config.identity.clone(),
            Arc::clone(&clock),
            background.clone(),
            metrics.clone(),
        );
        let limiter = RateLimiter::new(
            Arc::clone(&stores.quota),
            config.tiers,
            config.limits.failure,
            Arc::clone(&clock),
            metrics.clone(),
        );
        let accountant = QuotaAccountant::new(
            Arc::clone(&stores.quota),
            config.tiers,
            background.clone(),
            metrics.clone(),
        );
        let evaluator = Arc::new(AlertEvaluator::new(
            Arc::clone(&stores.quota),
            Arc::clone(&stores.alerts),
            notification_sink(config),
            background,
            Arc::clone(&clock),
            metrics,
        ));

        Self::new(resolver, limiter, accountant, evaluator, Arc::clone(&stores.alerts), clock)
    }

    pub async fn resolve_and_authenticate(
        &self,
        request: &RequestMetadata,
    ) -> Result<Identity, AuthError> {
        self.resolver.resolve(request).await
    }

    /// Read-only; calling it twice without an accounted request in between
    /// gives the same answer
    pub async fn check_limit(&self, identity: &Identity) -> Decision {
        self.limiter.check_limit(identity).await
    }

    /// Fire-and-forget. Returns false when the accounting job was dropped.
    pub fn record_outcome(&self, identity: &Identity, outcome: OutcomeRecord) -> bool {
        self.accountant.record(identity, outcome)
    }

    pub async fn evaluate_alerts(&self) -> Vec<Alert> {
        self.evaluator.evaluate_alerts().await
    }

    pub async fn acknowledge_alert(&self, id: Uuid, by: &str) -> Result<Alert, AlertError> {
        let alert = self.alerts.acknowledge_alert(id, by, self.clock.now()).await?;
        info!(alert_id = %id, by, "alert acknowledged");
        Ok(alert)
    }

    pub fn evaluator(&self) -> &Arc<AlertEvaluator> {
        &self.evaluator
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn notification_sink(config: &Config) -> Arc<dyn NotificationSink> {
    match &config.alerts.webhook {
        Some(webhook) => Arc::new(FanoutNotificationSink::new(vec![
            Box::new(LogNotificationSink),
            Box::new(WebhookNotificationSink::new(
                webhook.url.clone(),
                webhook.auth_token.clone(),
                Duration::from_millis(webhook.timeout_ms),
            )),
        ])),
        None => Arc::new(LogNotificationSink),
    }
}
