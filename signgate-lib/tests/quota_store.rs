mod common;

use common::{at, TestResult};
use signgate_lib::identity::Scope;
use signgate_lib::store::{CounterKey, MemoryStore, QuotaStore, TimeoutStore};
use signgate_lib::window::Window;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_increments_are_not_lost() -> TestResult {
    let store = Arc::new(TimeoutStore::new(MemoryStore::new(16), Duration::from_secs(5)));
    let now = at(2024, 5, 1, 12, 0, 0)?;
    let key = CounterKey::at(&Scope::new("ip:203.0.113.5"), Window::Hourly, now, 60);

    let tasks: Vec<_> = (0..1000)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move { store.increment(&key, 1).await })
        })
        .collect();

    let mut returned = Vec::with_capacity(tasks.len());
    for task in tasks {
        returned.push(task.await??);
    }

    assert_eq!(store.read(&key).await?, 1000);
    returned.sort_unstable();
    returned.dedup();
    assert_eq!(returned.len(), 1000, "every increment must observe a distinct value");
    Ok(())
}

#[tokio::test]
async fn new_day_reads_a_fresh_counter() -> TestResult {
    let store = MemoryStore::new(16);
    let scope = Scope::new("ip:203.0.113.5");
    let before = at(2024, 1, 1, 23, 59, 59)?;
    let after = at(2024, 1, 2, 0, 0, 1)?;

    let old_key = CounterKey::at(&scope, Window::Daily, before, 60);
    store.increment(&old_key, 1).await?;

    let new_key = CounterKey::at(&scope, Window::Daily, after, 60);
    assert_ne!(old_key, new_key);
    assert_eq!(store.read(&new_key).await?, 0);
    assert_eq!(store.read(&old_key).await?, 1);
    Ok(())
}

#[tokio::test]
async fn period_keys_follow_calendar_boundaries() -> TestResult {
    let t = at(2024, 3, 9, 17, 42, 5)?;
    assert_eq!(Window::Daily.period_key(t, 60).as_str(), "2024-03-09");
    assert_eq!(Window::Hourly.period_key(t, 60).as_str(), "2024-03-09T17");
    assert_eq!(Window::Burst.period_key(t, 60).as_str(), format!("b{}", t.timestamp() / 60));

    assert_eq!(Window::Hourly.reset_at(t, 60), at(2024, 3, 9, 18, 0, 0)?);
    assert_eq!(Window::Daily.reset_at(t, 60), at(2024, 3, 10, 0, 0, 0)?);
    Ok(())
}

#[tokio::test]
async fn expired_counters_are_purged() -> TestResult {
    let store = MemoryStore::new(16);
    let scope = Scope::new("account:acme");
    let t = at(2024, 6, 1, 10, 0, 0)?;

    for window in Window::EVALUATION_ORDER {
        store.increment(&CounterKey::at(&scope, window, t, 60), 1).await?;
    }
    assert_eq!(store.counter_count(), 3);

    assert_eq!(store.purge_expired(t).await?, 0);
    let much_later = at(2024, 6, 4, 0, 0, 0)?;
    assert_eq!(store.purge_expired(much_later).await?, 3);
    assert_eq!(store.counter_count(), 0);
    Ok(())
}
