use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use thiserror::Error;

use super::credentials::{Credential, CredentialKind};
use super::types::Tier;
use crate::config::CredentialEntry;

/// What the validator knows about a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub credential_id: String,
    pub account_id: String,
    pub tier: Tier,
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum CredentialLookupError {
    #[error("credential not found")]
    NotFound,

    #[error("credential validator unavailable: {0}")]
    Unavailable(String),
}

/// Looks up hashed credentials on behalf of the identity resolver
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(
        &self,
        credential: &Credential,
    ) -> Result<CredentialRecord, CredentialLookupError>;

    /// Stamp the credential as used. Callers treat failure as non-fatal.
    async fn record_last_used(
        &self,
        credential_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CredentialLookupError>;
}

/// Hex SHA-256 of the raw credential, the form credentials are stored in
pub fn hash_credential(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validator backed by the `[[credentials]]` table of the config file
pub struct StaticCredentialValidator {
    by_hash: AHashMap<(CredentialKind, String), CredentialRecord>,
    last_used: RwLock<AHashMap<String, DateTime<Utc>>>,
}

impl StaticCredentialValidator {
    pub fn new(entries: &[CredentialEntry]) -> Self {
        let by_hash = entries
            .iter()
            .map(|entry| {
                let record = CredentialRecord {
                    credential_id: entry.credential_id.clone(),
                    account_id: entry.account_id.clone(),
                    tier: entry.tier,
                    active: entry.active,
                };
                ((entry.kind, entry.key_sha256.to_ascii_lowercase()), record)
            })
            .collect();

        Self { by_hash, last_used: RwLock::new(AHashMap::new()) }
    }

    pub fn last_used(&self, credential_id: &str) -> Option<DateTime<Utc>> {
        self.last_used
            .read()
            .ok()
            .and_then(|guard| guard.get(credential_id).copied())
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentialValidator {
    async fn validate(
        &self,
        credential: &Credential,
    ) -> Result<CredentialRecord, CredentialLookupError> {
        let key = (credential.kind(), hash_credential(credential.secret()));
        self.by_hash
            .get(&key)
            .cloned()
            .ok_or(CredentialLookupError::NotFound)
    }

    async fn record_last_used(
        &self,
        credential_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CredentialLookupError> {
        let mut guard = self
            .last_used
            .write()
            .map_err(|_| CredentialLookupError::Unavailable("last-used table poisoned".into()))?;
        guard.insert(credential_id.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(secret: &str, active: bool) -> CredentialEntry {
        CredentialEntry {
            key_sha256: hash_credential(secret),
            kind: CredentialKind::ApiKey,
            credential_id: "cred-1".to_string(),
            account_id: "acct-1".to_string(),
            tier: Tier::Free,
            active,
        }
    }

    #[tokio::test]
    async fn finds_credential_by_hash() {
        let validator = StaticCredentialValidator::new(&[entry("sk_live_1", true)]);
        let record = validator.validate(&Credential::api_key("sk_live_1")).await;
        assert!(matches!(record, Ok(ref r) if r.account_id == "acct-1" && r.active));
    }

    #[tokio::test]
    async fn session_token_does_not_match_api_key_entry() {
        let validator = StaticCredentialValidator::new(&[entry("sk_live_1", true)]);
        let record = validator.validate(&Credential::session("sk_live_1")).await;
        assert!(matches!(record, Err(CredentialLookupError::NotFound)));
    }

    #[test]
    fn hash_is_lower_hex_sha256() {
        assert_eq!(
            hash_credential("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
