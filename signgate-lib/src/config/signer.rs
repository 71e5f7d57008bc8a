use serde::Deserialize;

/// Upstream signing backend
#[derive(Debug, Deserialize, Clone)]
pub struct SignerConfig {
    /// `host:port` of the signer
    /// Example: "127.0.0.1:9000"
    pub address: String,
    /// Timeout for one signer request in milliseconds
    /// Default: 10000
    #[serde(default = "default_signer_timeout")]
    pub timeout_ms: u64,
    /// Maximum idle pooled connections kept per host (0 = hyper default)
    /// Default: 32
    #[serde(default = "default_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_signer_timeout() -> u64 {
    10_000
}

fn default_max_idle_per_host() -> usize {
    32
}
