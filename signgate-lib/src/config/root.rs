use serde::Deserialize;
use std::net::SocketAddr;

use super::alerts::AlertsConfig;
use super::identity::{CredentialEntry, IdentityConfig};
use super::signer::SignerConfig;
use super::store::{AccountingConfig, StoreConfig};
use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::timeout::TimeoutConfig;
use crate::limiter::{FailurePolicies, TierTable};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to listen on
    /// Example: "0.0.0.0:7000" or "127.0.0.1:8080"
    pub listen: SocketAddr,
    /// Client connections served at once; further connections are closed on accept
    /// Default: 1024
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// The signing backend every admitted request is forwarded to
    pub signer: SignerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Static credential table (hashed keys only)
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
    /// Per-tier window limits
    /// Default: free = 100/day, 20/hour, 5/burst; unlimited = no limits
    #[serde(default)]
    pub tiers: TierTable,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub accounting: AccountingConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration
    /// Controls metrics and the observability server
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

/// How the limiter treats windows it could not read
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LimitsConfig {
    /// Default: "open" for every window
    #[serde(default)]
    pub failure: FailurePolicies,
}

fn default_max_connections() -> usize {
    1024
}
