use serde::Deserialize;
use std::net::IpAddr;

use crate::identity::{CredentialKind, Tier};

/// Where caller identity is read from
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Header carrying the proxy chain; the left-most entry is the client
    /// Default: "x-forwarded-for"
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,
    /// Address used when neither the header nor the socket peer is usable
    /// Default: None (such requests are rejected as unauthenticated)
    #[serde(default)]
    pub fallback_address: Option<IpAddr>,
    /// Default: "x-api-key"
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Default: "session"
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// Default: "x-session-token"
    #[serde(default = "default_session_header")]
    pub session_header: String,
    /// Upper bound on one credential lookup in milliseconds
    /// Default: 500
    #[serde(default = "default_validator_timeout")]
    pub validator_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            forwarded_header: default_forwarded_header(),
            fallback_address: None,
            api_key_header: default_api_key_header(),
            session_cookie: default_session_cookie(),
            session_header: default_session_header(),
            validator_timeout_ms: default_validator_timeout(),
        }
    }
}

fn default_forwarded_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_session_cookie() -> String {
    "session".to_string()
}

fn default_session_header() -> String {
    "x-session-token".to_string()
}

fn default_validator_timeout() -> u64 {
    500
}

/// One row of the static credential table
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialEntry {
    /// Lower-case hex SHA-256 of the raw credential
    pub key_sha256: String,
    /// Default: "api_key"
    #[serde(default)]
    pub kind: CredentialKind,
    pub credential_id: String,
    pub account_id: String,
    /// Default: "free"
    #[serde(default = "default_tier")]
    pub tier: Tier,
    /// Default: true
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_tier() -> Tier {
    Tier::Free
}

fn default_active() -> bool {
    true
}
