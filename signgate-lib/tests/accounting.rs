mod common;

use common::{at, ip, manual_clock, tiers, FaultyStore, TestResult};
use signgate_lib::accounting::QuotaAccountant;
use signgate_lib::background::BackgroundDispatcher;
use signgate_lib::clock::Clock;
use signgate_lib::config::load_from_str;
use signgate_lib::limiter::{FailurePolicies, RateLimiter, Remaining};
use signgate_lib::store::{CounterKey, MemoryStore, OutcomeRecord, QuotaStore, StoreHandles};
use signgate_lib::{Gateway, Window};
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn assert_untouched(store: &FaultyStore, key_for: impl Fn(Window) -> CounterKey) -> TestResult {
    for window in Window::EVALUATION_ORDER {
        assert_eq!(store.inner.read(&key_for(window)).await?, 0, "{window} counter moved");
    }
    assert!(store.inner.recent_outcomes(None, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_writes_are_reported_not_raised() -> TestResult {
    let store = Arc::new(FaultyStore::new());
    store.fail_writes.store(true, Ordering::SeqCst);
    let clock = manual_clock(at(2024, 3, 4, 9, 30, 0)?);
    let (dispatcher, background) = BackgroundDispatcher::spawn("accounting", 8, 1, None);
    let accountant = QuotaAccountant::new(store.clone(), tiers(100, 20, 5, 60), dispatcher, None);
    let limiter = RateLimiter::new(
        store.clone(),
        tiers(100, 20, 5, 60),
        FailurePolicies::default(),
        clock.clone(),
        None,
    );

    let caller = ip("198.51.100.30")?;
    let now = clock.now();
    let outcome = OutcomeRecord::failure(caller.scope(), now, 15, "signer_status");
    assert!(!accountant.record_now(&caller, outcome).await);
    background.shutdown().await;

    assert_untouched(&store, |w| CounterKey::at(&caller.scope(), w, now, 60)).await?;

    let decision = limiter.check_limit(&caller).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining(Window::Burst), Remaining::Count(5));
    assert_eq!(decision.remaining(Window::Daily), Remaining::Count(100));
    Ok(())
}

#[tokio::test]
async fn gateway_keeps_admitting_when_accounting_cannot_write() -> TestResult {
    let cfg = load_from_str(
        r#"
listen = "127.0.0.1:0"

[signer]
address = "127.0.0.1:9"

[tiers.free]
daily = 100
hourly = 20
burst = 5
burst_window_secs = 60
"#,
    )?;
    let store = Arc::new(FaultyStore::new());
    store.fail_writes.store(true, Ordering::SeqCst);
    let handles = StoreHandles { quota: store.clone(), alerts: Arc::new(MemoryStore::new(10)) };
    let clock = manual_clock(at(2024, 3, 4, 9, 30, 0)?);
    let (dispatcher, background) = BackgroundDispatcher::spawn("accounting", 8, 1, None);
    let gateway = Gateway::from_config(&cfg, &handles, dispatcher, clock.clone(), None);

    let caller = ip("198.51.100.31")?;
    let now = clock.now();
    for _ in 0..3 {
        assert!(gateway.record_outcome(&caller, OutcomeRecord::success(caller.scope(), now, 8)));
    }
    background.shutdown().await;

    assert_untouched(&store, |w| CounterKey::at(&caller.scope(), w, now, 60)).await?;
    let decision = gateway.check_limit(&caller).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining(Window::Burst), Remaining::Count(5));
    Ok(())
}
