use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local; counters are lost on restart and not shared between instances
    #[default]
    Memory,
    Redis,
}

/// Quota store connection
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Default: "memory"
    #[serde(default)]
    pub backend: StoreBackend,
    /// Connection URL, required for the redis backend
    /// Example: "redis://127.0.0.1:6379/0"
    #[serde(default)]
    pub url: Option<String>,
    /// Upper bound on every store call in milliseconds; expiry counts as an outage
    /// Default: 250
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
    /// Prefix of every key written to the store
    /// Default: "signgate"
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Maximum outcome entries kept per scope and in the global log
    /// Default: 1000
    #[serde(default = "default_outcome_retention")]
    pub outcome_retention: usize,
    /// How often the memory backend drops expired counters, in seconds
    /// Default: 300
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            timeout_ms: default_store_timeout(),
            key_prefix: default_key_prefix(),
            outcome_retention: default_outcome_retention(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_store_timeout() -> u64 {
    250
}

fn default_key_prefix() -> String {
    "signgate".to_string()
}

fn default_outcome_retention() -> usize {
    1000
}

fn default_purge_interval() -> u64 {
    300
}

/// Background queue that runs accounting and other best-effort writes
#[derive(Debug, Deserialize, Clone)]
pub struct AccountingConfig {
    /// Jobs beyond this many queued are dropped
    /// Default: 4096
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Default: 4
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self { queue_capacity: default_queue_capacity(), workers: default_workers() }
    }
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_workers() -> usize {
    4
}
