use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::client_ip::extract_client_ip;
use super::credentials::{extract_credential, Credential};
use super::types::Identity;
use super::validator::{CredentialLookupError, CredentialValidator};
use crate::background::BackgroundDispatcher;
use crate::clock::Clock;
use crate::config::IdentityConfig;
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

/// Why a caller could not be identified.
///
/// The display strings are what callers see, so a malformed credential and
/// an unknown one are indistinguishable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("unable to identify caller")]
    Unauthenticated,

    #[error("authentication temporarily unavailable")]
    ValidatorUnavailable,
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => values::AUTH_INVALID_CREDENTIAL,
            AuthError::Unauthenticated => values::AUTH_UNAUTHENTICATED,
            AuthError::ValidatorUnavailable => values::AUTH_VALIDATOR_UNAVAILABLE,
        }
    }
}

/// The parts of an inbound request identity resolution looks at
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub headers: http::HeaderMap,
    pub peer: Option<IpAddr>,
}

impl RequestMetadata {
    pub fn new(headers: http::HeaderMap, peer: Option<IpAddr>) -> Self {
        Self { headers, peer }
    }
}

/// Turns request metadata into exactly one [`Identity`]
pub struct IdentityResolver {
    validator: Arc<dyn CredentialValidator>,
    config: IdentityConfig,
    clock: Arc<dyn Clock>,
    touches: BackgroundDispatcher,
    metrics: Option<Arc<Metrics>>,
}

impl IdentityResolver {
    pub fn new(
        validator: Arc<dyn CredentialValidator>,
        config: IdentityConfig,
        clock: Arc<dyn Clock>,
        touches: BackgroundDispatcher,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self { validator, config, clock, touches, metrics }
    }

    pub async fn resolve(&self, request: &RequestMetadata) -> Result<Identity, AuthError> {
        let result = match extract_credential(&request.headers, &self.config) {
            Some(credential) => self.authenticate(&credential).await,
            None => self.anonymous(request),
        };

        if let (Err(e), Some(m)) = (&result, &self.metrics) {
            m.record_auth_failure(e.reason());
        }
        result
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Identity, AuthError> {
        if credential.secret().is_empty() {
            debug!(kind = ?credential.kind(), "empty credential presented");
            return Err(AuthError::InvalidCredential);
        }

        let timeout = Duration::from_millis(self.config.validator_timeout_ms);
        let lookup = tokio::time::timeout(timeout, self.validator.validate(credential)).await;

        let record = match lookup {
            Ok(Ok(record)) => record,
            Ok(Err(CredentialLookupError::NotFound)) => {
                debug!(kind = ?credential.kind(), "credential not found");
                return Err(AuthError::InvalidCredential);
            }
            Ok(Err(CredentialLookupError::Unavailable(e))) => {
                warn!(error = %e, "credential validator unavailable");
                return Err(AuthError::ValidatorUnavailable);
            }
            Err(_) => {
                warn!(timeout_ms = self.config.validator_timeout_ms, "credential validation timed out");
                return Err(AuthError::ValidatorUnavailable);
            }
        };

        if !record.active {
            debug!(credential_id = %record.credential_id, "inactive credential presented");
            return Err(AuthError::InvalidCredential);
        }

        self.touch(&record.credential_id);

        Ok(Identity::Account {
            account_id: record.account_id,
            credential_id: record.credential_id,
            tier: record.tier,
        })
    }

    fn anonymous(&self, request: &RequestMetadata) -> Result<Identity, AuthError> {
        extract_client_ip(
            &request.headers,
            &self.config.forwarded_header,
            request.peer,
            self.config.fallback_address,
        )
        .map(|address| Identity::Ip { address })
        .ok_or(AuthError::Unauthenticated)
    }

    fn touch(&self, credential_id: &str) {
        let validator = Arc::clone(&self.validator);
        let credential_id = credential_id.to_string();
        let at = self.clock.now();

        self.touches.dispatch(async move {
            if let Err(e) = validator.record_last_used(&credential_id, at).await {
                warn!(credential_id = %credential_id, error = %e, "failed to record credential use");
            }
        });
    }
}
