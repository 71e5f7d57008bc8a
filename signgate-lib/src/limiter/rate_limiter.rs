use std::sync::Arc;
use tracing::{debug, warn};

use super::decision::{slot, Decision, WindowStatus};
use super::limits::{FailurePolicies, FailurePolicy, Limit, Remaining, TierTable};
use crate::clock::Clock;
use crate::identity::Identity;
use crate::store::{CounterKey, QuotaStore};
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;
use crate::window::Window;

/// Multi-window limiter.
///
/// Reads counters only; the quota accountant increments them after the
/// request completes. Concurrent requests may therefore all pass against the
/// same pre-increment count and overshoot a limit by the number in flight.
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    tiers: TierTable,
    failure: FailurePolicies,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        tiers: TierTable,
        failure: FailurePolicies,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { store, tiers, failure, clock, metrics }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Evaluate daily, hourly then burst, stopping at the first exhausted window.
    ///
    /// Never fails: an unreadable counter is settled by the window's failure
    /// policy and flagged with `degraded`.
    pub async fn check_limit(&self, identity: &Identity) -> Decision {
        let now = self.clock.now();
        let tier = identity.effective_tier();
        let limits = self.tiers.for_tier(tier);
        let scope = identity.scope();
        let burst_secs = limits.burst_window_secs;

        let mut windows = Window::EVALUATION_ORDER.map(|w| {
            WindowStatus::unevaluated(w, limits.limit(w), w.reset_at(now, burst_secs))
        });
        let mut denied_reason = None;
        let mut degraded = false;

        for window in Window::EVALUATION_ORDER {
            let Limit::Finite(limit) = limits.limit(window) else {
                continue;
            };
            let status = &mut windows[slot(window)];
            let key = CounterKey::at(&scope, window, now, burst_secs);

            match self.store.read(&key).await {
                Ok(used) => {
                    status.used = Some(used);
                    status.remaining = Remaining::Count(limit.saturating_sub(used));
                    if used >= limit {
                        denied_reason = Some(window);
                        break;
                    }
                }
                Err(e) => {
                    degraded = true;
                    let policy = self.failure.for_window(window);
                    warn!(
                        scope = %scope,
                        window = %window,
                        policy = ?policy,
                        error = %e,
                        "quota read failed, applying failure policy"
                    );
                    if let Some(m) = &self.metrics {
                        m.record_store_error(values::OP_READ);
                    }
                    if policy == FailurePolicy::Closed {
                        denied_reason = Some(window);
                        break;
                    }
                }
            }
        }

        let decision = Decision {
            allowed: denied_reason.is_none(),
            scope,
            tier,
            windows,
            denied_reason,
            degraded,
            evaluated_at: now,
        };
        self.observe(&decision);
        decision
    }

    fn observe(&self, decision: &Decision) {
        match decision.denied_reason {
            Some(window) => debug!(
                scope = %decision.scope,
                tier = %decision.tier,
                window = %window,
                reset_at = %decision.reset_at(window),
                "request denied"
            ),
            None => debug!(scope = %decision.scope, tier = %decision.tier, degraded = decision.degraded, "request allowed"),
        }

        let Some(m) = &self.metrics else { return };
        let tier = decision.tier.as_str();
        match decision.denied_reason {
            Some(window) => m.record_decision_denied(window.as_str(), tier),
            None => m.record_decision_allowed(tier),
        }
        if decision.degraded {
            m.record_decision_degraded(tier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::{Scope, Tier};
    use crate::limiter::TierLimits;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::net::IpAddr;

    fn limiter(store: Arc<MemoryStore>, limits: TierLimits) -> RateLimiter {
        let clock = Utc
            .with_ymd_and_hms(2024, 4, 2, 9, 30, 0)
            .single()
            .map(ManualClock::new)
            .unwrap_or_else(|| ManualClock::new(Utc::now()));
        let tiers = TierTable { free: limits, unlimited: TierLimits::unbounded() };
        RateLimiter::new(store, tiers, FailurePolicies::default(), Arc::new(clock), None)
    }

    fn ip() -> Identity {
        Identity::Ip { address: IpAddr::from([203, 0, 113, 5]) }
    }

    #[tokio::test]
    async fn zero_limit_denies_everything() {
        let limits = TierLimits {
            daily: Limit::Finite(0),
            hourly: Limit::Unbounded,
            burst: Limit::Unbounded,
            burst_window_secs: 60,
        };
        let decision = limiter(Arc::new(MemoryStore::new(10)), limits).check_limit(&ip()).await;
        assert!(!decision.allowed);
        assert_eq!(decision.denied_reason, Some(Window::Daily));
        assert_eq!(decision.remaining(Window::Daily), Remaining::Count(0));
    }

    #[tokio::test]
    async fn windows_after_denial_are_not_read() -> Result<(), crate::store::StoreError> {
        let store = Arc::new(MemoryStore::new(10));
        let limits = TierLimits {
            daily: Limit::Finite(1),
            hourly: Limit::Finite(10),
            burst: Limit::Unbounded,
            burst_window_secs: 60,
        };
        let limiter = limiter(Arc::clone(&store), limits);
        let now = limiter.clock.now();
        let key = CounterKey::at(&Scope::new("ip:203.0.113.5"), Window::Daily, now, 60);
        store.increment(&key, 1).await?;

        let decision = limiter.check_limit(&ip()).await;
        assert_eq!(decision.denied_reason, Some(Window::Daily));
        assert_eq!(decision.remaining(Window::Hourly), Remaining::Unknown);
        assert_eq!(decision.remaining(Window::Burst), Remaining::Unbounded);
        Ok(())
    }

    #[tokio::test]
    async fn account_gets_unlimited_class() {
        let identity = Identity::Account {
            account_id: "acct-1".into(),
            credential_id: "cred-1".into(),
            tier: Tier::Free,
        };
        let decision = limiter(Arc::new(MemoryStore::new(10)), TierTable::default().free)
            .check_limit(&identity)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.tier, Tier::Unlimited);
        assert!(decision.tightest().is_none());
    }
}
