use signgate_lib::alerts::RuleType;
use signgate_lib::config::{load_from_path, StoreBackend};
use signgate_lib::limiter::{FailurePolicy, Limit};
use std::io::Write;
use tempfile::NamedTempFile;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const EXAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../signgate.example.toml");

#[test]
fn shipped_example_config_loads() -> TestResult {
    let cfg = load_from_path(EXAMPLE)?;

    assert_eq!(cfg.listen.port(), 8080);
    assert_eq!(cfg.tiers.free.burst, Limit::Finite(5));
    assert!(cfg.tiers.unlimited.is_unbounded());
    assert_eq!(cfg.limits.failure.burst, FailurePolicy::Closed);
    assert_eq!(cfg.limits.failure.daily, FailurePolicy::Open);
    assert_eq!(cfg.store.backend, StoreBackend::Memory);
    assert_eq!(cfg.credentials.len(), 1);
    assert_eq!(cfg.telemetry.metrics_port, Some(9090));

    let rules = cfg.alert_rules()?;
    assert_eq!(rules.len(), 4);
    assert!(rules.iter().any(|r| r.condition.rule_type() == RuleType::ErrorCount));
    Ok(())
}

#[test]
fn redis_backend_from_file() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
listen = "127.0.0.1:8080"

[signer]
address = "signer.internal:9000"

[store]
backend = "redis"
url = "redis://127.0.0.1:6379"
key_prefix = "gw"
"#
    )?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.store.backend, StoreBackend::Redis);
    assert_eq!(cfg.store.url.as_deref(), Some("redis://127.0.0.1:6379"));
    assert_eq!(cfg.store.key_prefix, "gw");
    assert_eq!(cfg.store.timeout_ms, 250);
    Ok(())
}

#[test]
fn duplicate_rule_ids_are_rejected() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
listen = "127.0.0.1:8080"

[signer]
address = "127.0.0.1:9000"

[[alerts.rules]]
id = "dup"
name = "first"
type = "error_rate"
threshold = 0.5

[[alerts.rules]]
id = "dup"
name = "second"
type = "error_rate"
threshold = 0.9
"#
    )?;

    let err = load_from_path(file.path()).err().ok_or("duplicate ids accepted")?;
    assert!(err.to_string().contains("dup"));
    Ok(())
}

#[test]
fn alert_window_longer_than_a_day_is_rejected() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
listen = "127.0.0.1:8080"

[signer]
address = "127.0.0.1:9000"

[[alerts.rules]]
id = "weekly"
name = "weekly errors"
type = "error_count"
threshold = 100
window_minutes = 10080
"#
    )?;

    let err = load_from_path(file.path()).err().ok_or("week-long window accepted")?;
    assert!(err.to_string().contains("window_minutes"));
    Ok(())
}

#[test]
fn missing_file_is_a_config_error() {
    let result = load_from_path("/nonexistent/signgate.toml");
    assert!(matches!(result, Err(signgate_lib::GatewayError::Config(_))));
}
