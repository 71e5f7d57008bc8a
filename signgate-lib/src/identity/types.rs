use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Named class of caller with its own limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Unlimited,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Unlimited => "unlimited",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is making the request. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Anonymous caller keyed by network address
    Ip { address: IpAddr },
    /// Caller holding a valid credential
    Account { account_id: String, credential_id: String, tier: Tier },
}

impl Identity {
    /// Tier whose limits apply to this caller.
    ///
    /// A validated credential always gets the unlimited class, whatever tier
    /// the account carried historically.
    pub fn effective_tier(&self) -> Tier {
        match self {
            Identity::Ip { .. } => Tier::Free,
            Identity::Account { .. } => Tier::Unlimited,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Identity::Ip { address } => Scope(format!("ip:{address}")),
            Identity::Account { account_id, .. } => Scope(format!("account:{account_id}")),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Account { .. })
    }
}

/// Identity-derived key that buckets counters and outcomes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
