use http::HeaderName;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::alerts::AlertRule;
use crate::config::{Config, StoreBackend};
use crate::error::{GatewayError, Result};
use crate::window::Window;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GatewayError::Config(format!("Failed to read config file: {e}")))?;
    load_from_str(&txt)
}

pub fn load_from_str(txt: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(txt)
        .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

impl Config {
    /// Alert rules in their runtime form
    pub fn alert_rules(&self) -> Result<Vec<AlertRule>> {
        self.alerts
            .rules
            .iter()
            .map(|r| r.to_rule().map_err(GatewayError::Config))
            .collect()
    }
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.signer.address.trim().is_empty() {
        return Err(GatewayError::Config("signer address cannot be empty".into()));
    }
    format!("http://{}/", cfg.signer.address)
        .parse::<http::Uri>()
        .map_err(|e| GatewayError::Config(format!("Invalid signer address: {e}")))?;
    if cfg.signer.timeout_ms == 0 {
        return Err(GatewayError::Config("signer timeout_ms must be > 0".into()));
    }

    for name in [
        &cfg.identity.forwarded_header,
        &cfg.identity.api_key_header,
        &cfg.identity.session_header,
    ] {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GatewayError::Config(format!("Invalid header name: {name}")))?;
    }
    if cfg.identity.validator_timeout_ms == 0 {
        return Err(GatewayError::Config("identity validator_timeout_ms must be > 0".into()));
    }

    let mut credential_ids = HashSet::new();
    for entry in &cfg.credentials {
        if entry.key_sha256.len() != 64 || hex::decode(&entry.key_sha256).is_err() {
            return Err(GatewayError::Config(format!(
                "Credential {} must carry a hex SHA-256 key hash",
                entry.credential_id
            )));
        }
        if !credential_ids.insert(entry.credential_id.as_str()) {
            return Err(GatewayError::Config(format!(
                "Duplicate credential id: {}",
                entry.credential_id
            )));
        }
    }

    for (tier, limits) in [("free", &cfg.tiers.free), ("unlimited", &cfg.tiers.unlimited)] {
        let bursty = !limits.limit(Window::Burst).is_unbounded();
        if bursty && limits.burst_window_secs == 0 {
            return Err(GatewayError::Config(format!(
                "Tier {tier}: burst_window_secs must be > 0"
            )));
        }
    }

    if cfg.store.backend == StoreBackend::Redis && cfg.store.url.is_none() {
        return Err(GatewayError::Config("store url is required for the redis backend".into()));
    }
    if cfg.store.timeout_ms == 0 {
        return Err(GatewayError::Config("store timeout_ms must be > 0".into()));
    }
    if cfg.accounting.workers == 0 || cfg.accounting.queue_capacity == 0 {
        return Err(GatewayError::Config(
            "accounting workers and queue_capacity must be > 0".into(),
        ));
    }

    let mut rule_ids = HashSet::new();
    for rule in &cfg.alerts.rules {
        if !rule_ids.insert(rule.id.as_str()) {
            return Err(GatewayError::Config(format!("Duplicate alert rule id: {}", rule.id)));
        }
    }
    cfg.alert_rules()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() -> Result<()> {
        let cfg = load_from_str(
            r#"
            listen = "127.0.0.1:7000"
            [signer]
            address = "127.0.0.1:9000"
            "#,
        )?;
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.alerts.interval_secs, 300);
        assert_eq!(cfg.identity.forwarded_header, "x-forwarded-for");
        assert_eq!(cfg.logging.level, "info");
        Ok(())
    }

    #[test]
    fn redis_backend_requires_url() {
        let res = load_from_str(
            r#"
            listen = "127.0.0.1:7000"
            [signer]
            address = "127.0.0.1:9000"
            [store]
            backend = "redis"
            "#,
        );
        assert!(matches!(res, Err(GatewayError::Config(_))));
    }

    #[test]
    fn fractional_consecutive_threshold_is_rejected() {
        let res = load_from_str(
            r#"
            listen = "127.0.0.1:7000"
            [signer]
            address = "127.0.0.1:9000"
            [[alerts.rules]]
            id = "c"
            name = "streak"
            type = "consecutive_failures"
            threshold = 2.5
            "#,
        );
        assert!(matches!(res, Err(GatewayError::Config(_))));
    }

    #[test]
    fn short_key_hash_is_rejected() {
        let res = load_from_str(
            r#"
            listen = "127.0.0.1:7000"
            [signer]
            address = "127.0.0.1:9000"
            [[credentials]]
            key_sha256 = "abcd"
            credential_id = "k1"
            account_id = "acme"
            "#,
        );
        assert!(matches!(res, Err(GatewayError::Config(_))));
    }
}
