//! Caller identification.
//!
//! A request is either anonymous, keyed by the client address taken from the
//! proxy chain, or authenticated by an API key or session token checked
//! against a [`CredentialValidator`].

mod client_ip;
mod credentials;
mod resolver;
mod types;
mod validator;

pub use client_ip::extract_client_ip;
pub use credentials::{extract_credential, Credential, CredentialKind};
pub use resolver::{AuthError, IdentityResolver, RequestMetadata};
pub use types::{Identity, Scope, Tier};
pub use validator::{
    hash_credential, CredentialLookupError, CredentialRecord, CredentialValidator,
    StaticCredentialValidator,
};
