use http::StatusCode;
use thiserror::Error;

use crate::identity::AuthError;
use crate::telemetry::metrics::values;
use crate::window::Window;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub(crate) type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong while handling one request
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("No credential and no usable client address")]
    Unauthenticated,

    #[error("Credential validator unavailable")]
    ValidatorUnavailable,

    #[error("{0} limit exceeded")]
    LimitExceeded(Window),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Failed to get response from signer: {0}")]
    SignerUnreachable(String),

    #[error("Signer did not answer in time")]
    SignerTimeout,
}

impl HttpError {
    /// Label recorded in metrics and in the outcome log
    pub fn error_type(&self) -> &'static str {
        match self {
            HttpError::InvalidCredential => values::AUTH_INVALID_CREDENTIAL,
            HttpError::Unauthenticated => values::AUTH_UNAUTHENTICATED,
            HttpError::ValidatorUnavailable => values::AUTH_VALIDATOR_UNAVAILABLE,
            HttpError::LimitExceeded(_) => "rate_limited",
            HttpError::InvalidUri(_) => "invalid_uri",
            HttpError::SignerUnreachable(_) => values::ERROR_SIGNER_UNREACHABLE,
            HttpError::SignerTimeout => values::ERROR_SIGNER_TIMEOUT,
        }
    }

    /// Message shown to the caller. Both auth failures read the same.
    pub fn public_message(&self) -> &'static str {
        match self {
            HttpError::InvalidCredential | HttpError::Unauthenticated => "invalid credential",
            HttpError::ValidatorUnavailable => "authentication temporarily unavailable",
            HttpError::LimitExceeded(_) => "rate limit exceeded",
            HttpError::InvalidUri(_) => "bad request",
            HttpError::SignerUnreachable(_) | HttpError::SignerTimeout => "signing backend unavailable",
        }
    }
}

impl From<AuthError> for HttpError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredential => HttpError::InvalidCredential,
            AuthError::Unauthenticated => HttpError::Unauthenticated,
            AuthError::ValidatorUnavailable => HttpError::ValidatorUnavailable,
        }
    }
}

impl From<&HttpError> for StatusCode {
    fn from(e: &HttpError) -> StatusCode {
        match e {
            HttpError::InvalidCredential | HttpError::Unauthenticated => StatusCode::UNAUTHORIZED,
            HttpError::ValidatorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            HttpError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            HttpError::SignerUnreachable(_) => StatusCode::BAD_GATEWAY,
            HttpError::SignerTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
