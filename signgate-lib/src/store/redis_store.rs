use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, Script};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::outcome::{minute_of, MinuteBucket, AGGREGATE_HORIZON_MINUTES};
use super::{AlertStore, CounterKey, OutcomeRecord, OutcomeSummary, QuotaStore, StoreError};
use crate::alerts::{Alert, AlertError, AlertRule};
use crate::identity::Scope;

const MAX_ALERTS: isize = 10_000;
/// Per-scope outcome lists of idle scopes expire after this long
const OUTCOME_TTL_SECS: i64 = 2 * 86_400;
/// Minute buckets outlive the aggregate horizon by an hour
const BUCKET_TTL_SECS: i64 = (AGGREGATE_HORIZON_MINUTES + 60) * 60;

// Flips the acknowledged flag only if it is still unset; one round trip, no WATCH.
const ACKNOWLEDGE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return {'not_found', ''}
end
local alert = cjson.decode(raw)
if alert.acknowledged then
  return {'already_acknowledged', ''}
end
alert.acknowledged = true
alert.acknowledged_at = ARGV[2]
alert.acknowledged_by = ARGV[3]
local updated = cjson.encode(alert)
redis.call('HSET', KEYS[1], ARGV[1], updated)
return {'ok', updated}
"#;

/// Redis (or Dragonfly) backend.
///
/// Counters are plain integer keys bumped with `INCRBY` and given an absolute
/// expiry in the same `MULTI` block. Outcomes are JSON entries in capped
/// lists, newest at the head, plus one `HINCRBY` hash per scope and UTC minute
/// that windowed summaries add up. Rules and alerts are JSON values in hashes.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    retention: usize,
    acknowledge: Script,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str, retention: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = ConnectionManager::new(client).await.map_err(store_error)?;

        let mut ping = conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut ping)
            .await
            .map_err(store_error)?;

        debug!(prefix, "redis quota store reachable");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            retention: retention.max(1),
            acknowledge: Script::new(ACKNOWLEDGE_SCRIPT),
        })
    }

    fn outcomes_key(&self, scope: Option<&Scope>) -> String {
        match scope {
            Some(scope) => format!("{}:outcomes:{scope}", self.prefix),
            None => format!("{}:outcomes", self.prefix),
        }
    }

    fn bucket_key(&self, scope: Option<&Scope>, minute: i64) -> String {
        match scope {
            Some(scope) => format!("{}:agg:{scope}:{minute}", self.prefix),
            None => format!("{}:agg:{minute}", self.prefix),
        }
    }

    fn rules_key(&self) -> String {
        format!("{}:alert_rules", self.prefix)
    }

    fn alerts_key(&self) -> String {
        format!("{}:alerts", self.prefix)
    }

    fn alerts_index_key(&self) -> String {
        format!("{}:alerts:index", self.prefix)
    }

    async fn outcome_entries(
        &self,
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.outcomes_key(scope))
            .arg(0)
            .arg(last_index(limit))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        raw.iter().map(|entry| decode(entry)).collect()
    }
}

fn store_error(e: RedisError) -> StoreError {
    if e.kind() == ErrorKind::TypeError {
        StoreError::Corrupt(e.to_string())
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn last_index(len: usize) -> isize {
    isize::try_from(len).unwrap_or(isize::MAX).saturating_sub(1)
}

#[async_trait]
impl QuotaStore for RedisStore {
    async fn increment(&self, key: &CounterKey, amount: u64) -> Result<u64, StoreError> {
        let storage_key = key.storage_key(&self.prefix);
        let mut conn = self.conn.clone();

        let (value,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(&storage_key)
            .arg(amount)
            .cmd("EXPIREAT")
            .arg(&storage_key)
            .arg(key.expires_at.timestamp())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(value)
    }

    async fn read(&self, key: &CounterKey) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = redis::cmd("GET")
            .arg(key.storage_key(&self.prefix))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value.unwrap_or(0))
    }

    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError> {
        let entry = encode(outcome)?;
        let scoped = self.outcomes_key(Some(&outcome.scope));
        let global = self.outcomes_key(None);
        let last = last_index(self.retention);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LPUSH")
            .arg(&scoped)
            .arg(&entry)
            .ignore()
            .cmd("LTRIM")
            .arg(&scoped)
            .arg(0)
            .arg(last)
            .ignore()
            .cmd("EXPIRE")
            .arg(&scoped)
            .arg(OUTCOME_TTL_SECS)
            .ignore()
            .cmd("LPUSH")
            .arg(&global)
            .arg(&entry)
            .ignore()
            .cmd("LTRIM")
            .arg(&global)
            .arg(0)
            .arg(last)
            .ignore();

        let minute = minute_of(outcome.timestamp);
        let failed = u64::from(!outcome.success);
        for bucket in [
            self.bucket_key(Some(&outcome.scope), minute),
            self.bucket_key(None, minute),
        ] {
            pipe.cmd("HINCRBY").arg(&bucket).arg(MinuteBucket::TOTAL).arg(1).ignore();
            pipe.cmd("HINCRBY").arg(&bucket).arg(MinuteBucket::FAILED).arg(failed).ignore();
            pipe.cmd("HINCRBY")
                .arg(&bucket)
                .arg(MinuteBucket::LATENCY_MS)
                .arg(outcome.latency_ms)
                .ignore();
            if let (false, Some(kind)) = (outcome.success, &outcome.error_kind) {
                pipe.cmd("HINCRBY")
                    .arg(&bucket)
                    .arg(format!("{}{kind}", MinuteBucket::KIND_PREFIX))
                    .arg(1)
                    .ignore();
            }
            pipe.cmd("EXPIRE").arg(&bucket).arg(BUCKET_TTL_SECS).ignore();
        }

        pipe.query_async::<()>(&mut conn).await.map_err(store_error)
    }

    async fn recent_outcomes(
        &self,
        scope: Option<&Scope>,
        limit: usize,
    ) -> Result<Vec<bool>, StoreError> {
        let entries = self.outcome_entries(scope, limit).await?;
        Ok(entries.into_iter().map(|o| o.success).collect())
    }

    async fn outcome_summary(
        &self,
        scope: Option<&Scope>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        error_kind: Option<&str>,
    ) -> Result<OutcomeSummary, StoreError> {
        let last = minute_of(until);
        let first = minute_of(since).max(last - AGGREGATE_HORIZON_MINUTES);
        let mut summary = OutcomeSummary::default();
        if first > last {
            return Ok(summary);
        }

        let mut pipe = redis::pipe();
        for minute in first..=last {
            pipe.cmd("HGETALL").arg(self.bucket_key(scope, minute));
        }
        let mut conn = self.conn.clone();
        let buckets: Vec<HashMap<String, u64>> =
            pipe.query_async(&mut conn).await.map_err(store_error)?;

        for fields in buckets {
            summary.merge(&MinuteBucket::from_fields(fields), error_kind);
        }
        Ok(summary)
    }
}

#[async_trait]
impl AlertStore for RedisStore {
    async fn list_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("HVALS")
            .arg(self.rules_key())
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let mut rules = raw
            .iter()
            .map(|r| decode::<AlertRule>(r))
            .collect::<Result<Vec<_>, _>>()?;
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn upsert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(self.rules_key())
            .arg(&rule.id)
            .arg(encode(rule)?)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("HDEL")
            .arg(self.rules_key())
            .arg(rule_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn mark_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(self.rules_key())
            .arg(rule_id)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let raw = raw.ok_or_else(|| StoreError::Corrupt(format!("unknown alert rule {rule_id}")))?;
        let mut rule: AlertRule = decode(&raw)?;
        rule.last_triggered = Some(at);
        self.upsert_rule(&rule).await
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let id = alert.id.to_string();
        let index = self.alerts_index_key();
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(self.alerts_key())
            .arg(&id)
            .arg(encode(alert)?)
            .ignore()
            .cmd("LPUSH")
            .arg(&index)
            .arg(&id)
            .ignore()
            .cmd("LTRIM")
            .arg(&index)
            .arg(0)
            .arg(MAX_ALERTS - 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(self.alerts_index_key())
            .arg(0)
            .arg(last_index(limit))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.alerts_key())
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        raw.iter().flatten().map(|r| decode(r)).collect()
    }

    async fn acknowledge_alert(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        let mut conn = self.conn.clone();
        let (status, payload): (String, String) = self
            .acknowledge
            .key(self.alerts_key())
            .arg(id.to_string())
            .arg(at.to_rfc3339())
            .arg(by)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        match status.as_str() {
            "ok" => Ok(decode(&payload)?),
            "already_acknowledged" => Err(AlertError::AlreadyAcknowledged(id)),
            _ => Err(AlertError::NotFound(id)),
        }
    }
}
