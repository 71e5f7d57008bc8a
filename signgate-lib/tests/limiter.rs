mod common;

use common::{account, at, ip, manual_clock, tiers, FaultyStore, TestResult};
use signgate_lib::clock::Clock;
use signgate_lib::limiter::{FailurePolicies, FailurePolicy, Remaining, RateLimiter, TierTable};
use signgate_lib::store::{CounterKey, MemoryStore, QuotaStore};
use signgate_lib::window::Window;
use std::sync::Arc;

#[tokio::test]
async fn daily_limit_denies_the_101st_request() -> TestResult {
    let store = Arc::new(MemoryStore::new(16));
    let clock = manual_clock(at(2024, 2, 1, 8, 0, 0)?);
    let limiter = RateLimiter::new(
        store.clone(),
        tiers(100, 1000, 1000, 60),
        FailurePolicies::default(),
        clock.clone(),
        None,
    );
    let caller = ip("198.51.100.20")?;
    let key = CounterKey::at(&caller.scope(), Window::Daily, clock.now(), 60);

    store.increment(&key, 99).await?;
    let hundredth = limiter.check_limit(&caller).await;
    assert!(hundredth.allowed);
    assert_eq!(hundredth.remaining(Window::Daily), Remaining::Count(1));

    store.increment(&key, 1).await?;
    let next = limiter.check_limit(&caller).await;
    assert!(!next.allowed);
    assert_eq!(next.denied_reason, Some(Window::Daily));
    assert_eq!(next.reset_at(Window::Daily), at(2024, 2, 2, 0, 0, 0)?);
    Ok(())
}

#[tokio::test]
async fn burst_denial_reports_unspent_hourly_and_daily() -> TestResult {
    let store = Arc::new(MemoryStore::new(16));
    let clock = manual_clock(at(2024, 2, 1, 8, 0, 10)?);
    let limiter = RateLimiter::new(
        store.clone(),
        tiers(100, 20, 5, 60),
        FailurePolicies::default(),
        clock.clone(),
        None,
    );
    let caller = ip("203.0.113.5")?;
    let now = clock.now();
    for window in Window::EVALUATION_ORDER {
        store.increment(&CounterKey::at(&caller.scope(), window, now, 60), 5).await?;
    }

    let decision = limiter.check_limit(&caller).await;
    assert_eq!(decision.denied_reason, Some(Window::Burst));
    assert_eq!(decision.remaining(Window::Daily), Remaining::Count(95));
    assert_eq!(decision.remaining(Window::Hourly), Remaining::Count(15));
    assert_eq!(decision.remaining(Window::Burst), Remaining::Count(0));
    Ok(())
}

#[tokio::test]
async fn unlimited_class_is_never_denied() -> TestResult {
    let store = Arc::new(MemoryStore::new(16));
    let clock = manual_clock(at(2024, 2, 1, 8, 0, 0)?);
    let limiter = RateLimiter::new(
        store.clone(),
        TierTable::default(),
        FailurePolicies::default(),
        clock.clone(),
        None,
    );
    let caller = account("acme");
    let now = clock.now();
    for window in Window::EVALUATION_ORDER {
        store.increment(&CounterKey::at(&caller.scope(), window, now, 60), 10_000).await?;
    }

    let decision = limiter.check_limit(&caller).await;
    assert!(decision.allowed);
    assert!(!decision.degraded);
    for window in Window::EVALUATION_ORDER {
        assert_eq!(decision.remaining(window), Remaining::Unbounded);
    }
    Ok(())
}

#[tokio::test]
async fn store_outage_fails_open_and_marks_degraded() -> TestResult {
    let clock = manual_clock(at(2024, 2, 1, 8, 0, 0)?);
    let limiter = RateLimiter::new(
        Arc::new(FaultyStore::failing_reads()),
        tiers(100, 20, 5, 60),
        FailurePolicies::default(),
        clock,
        None,
    );

    let decision = limiter.check_limit(&ip("203.0.113.9")?).await;
    assert!(decision.allowed);
    assert!(decision.degraded);
    assert_eq!(decision.denied_reason, None);
    assert_eq!(decision.remaining(Window::Daily), Remaining::Unknown);
    Ok(())
}

#[tokio::test]
async fn closed_policy_denies_on_outage() -> TestResult {
    let clock = manual_clock(at(2024, 2, 1, 8, 0, 0)?);
    let failure = FailurePolicies { hourly: FailurePolicy::Closed, ..FailurePolicies::default() };
    let limiter = RateLimiter::new(
        Arc::new(FaultyStore::failing_reads()),
        tiers(100, 20, 5, 60),
        failure,
        clock,
        None,
    );

    let decision = limiter.check_limit(&ip("203.0.113.9")?).await;
    assert!(!decision.allowed);
    assert!(decision.degraded);
    assert_eq!(decision.denied_reason, Some(Window::Hourly));
    Ok(())
}

#[tokio::test]
async fn check_is_read_only() -> TestResult {
    let store = Arc::new(MemoryStore::new(16));
    let clock = manual_clock(at(2024, 2, 1, 8, 0, 0)?);
    let limiter =
        RateLimiter::new(store.clone(), tiers(3, 3, 3, 60), FailurePolicies::default(), clock, None);
    let caller = ip("192.0.2.1")?;

    let first = limiter.check_limit(&caller).await;
    let second = limiter.check_limit(&caller).await;
    assert_eq!(first, second);
    assert_eq!(store.counter_count(), 0);
    Ok(())
}
