// src/error.rs

use std::time::Duration;
use thiserror::Error;

use crate::registry::RegistryError;

/// The primary error type for the `nila-dcr` library.
#[derive(Debug, Error)]
pub enum NilaDcrError {
    /// The token does not have exactly three `.`-separated segments.
    #[error("Wrong number of segments: expected 3, found {0}")]
    WrongSegmentCount(usize),

    /// The header segment is not base64url-encoded JSON object.
    #[error("Invalid header encoding: {0}")]
    InvalidHeader(String),

    /// The payload segment is not base64url-encoded JSON object, or a registered claim has the wrong type.
    #[error("Invalid payload encoding: {0}")]
    InvalidPayload(String),

    /// The signature segment is not valid base64url.
    #[error("Invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    /// Serializing a header or payload to JSON failed.
    #[error("Failed to encode token segment: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The JWT header has no `alg`, or it is empty.
    #[error("The JWT header is missing the 'alg' field")]
    EmptyAlgorithm,

    /// The algorithm is not implemented by this library.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The algorithm is implemented but not allowed by the caller.
    #[error("Algorithm not allowed: {0}")]
    DisallowedAlgorithm(String),

    /// No key material was supplied for a signed token.
    #[error("Key material may not be empty")]
    EmptyKey,

    /// The JWT header is missing the 'kid' field while the key is a key map.
    #[error("The JWT header is missing the 'kid' (Key ID) field")]
    MissingKeyId,

    /// A key with the specified 'kid' was not found in the key map.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// The key belongs to a different algorithm family than the token.
    #[error("The supplied key cannot be used with algorithm {0}")]
    KeyAlgorithmMismatch(String),

    /// The signature did not verify against the key.
    #[error("Signature verification failed")]
    InvalidSignature,

    /// The underlying crypto primitive failed (as opposed to a clean mismatch).
    #[error("JWT crypto error: {0}")]
    Crypto(#[from] jsonwebtoken::errors::Error),

    /// `nbf` or `iat` lies in the future.
    #[error("Cannot handle token prior to {claim} {timestamp}")]
    BeforeValid { claim: &'static str, timestamp: i64 },

    /// `exp` lies in the past.
    #[error("Expired token: exp {0}")]
    Expired(i64),

    /// `none` was allowed without the explicit confirmation sentinel.
    #[error("Unsecured tokens were allowed without explicit confirmation")]
    UnsecuredNotConfirmed,

    /// Only `iss` and `jti` may be read from an unverified token.
    #[error("Unsupported claim: {0}")]
    UnsupportedClaim(String),

    /// A software statement field is missing or malformed.
    #[error("Invalid software statement field '{field}': {reason}")]
    Schema { field: &'static str, reason: String },

    /// A host in the statement does not match the `client_uri` host.
    #[error("Host of '{claim}' ({found}) does not match client_uri host ({expected})")]
    DomainMismatch {
        claim: &'static str,
        expected: String,
        found: String,
    },

    /// The issuer URL has no usable host.
    #[error("Invalid issuer host: {0}")]
    InvalidHost(String),

    /// The well-known key endpoint returned nothing for this host.
    #[error("Empty signing key body for host: {0}")]
    EmptyBody(String),

    /// The well-known key endpoint responded with a failure.
    #[error("Failed to fetch signing key: {0}")]
    KeyFetch(String),

    /// The published public key could not be parsed.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// A local private key (for signing) is malformed or unreadable.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Errors passed through from the client registry boundary.
    #[error("Client registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Dynamic clients are defined by their statement and can never be updated.
    #[error("Dynamic clients cannot be updated")]
    DynamicClientImmutable,

    /// A boundary call exceeded its deadline. Safe to retry.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Coarse classification of [`NilaDcrError`], used for pattern matching and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    Algorithm,
    Signature,
    Temporal,
    UnsecuredNotConfirmed,
    Schema,
    DomainMismatch,
    KeyResolution,
    Registry,
    UnsupportedOperation,
    Timeout,
    Configuration,
}

impl NilaDcrError {
    /// Returns the taxonomy kind this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use NilaDcrError::*;
        match self {
            WrongSegmentCount(_)
            | InvalidHeader(_)
            | InvalidPayload(_)
            | InvalidSignatureEncoding(_)
            | Encoding(_) => ErrorKind::Format,
            EmptyAlgorithm
            | UnsupportedAlgorithm(_)
            | DisallowedAlgorithm(_)
            | EmptyKey
            | MissingKeyId
            | KeyNotFound(_)
            | KeyAlgorithmMismatch(_) => ErrorKind::Algorithm,
            InvalidSignature | Crypto(_) => ErrorKind::Signature,
            BeforeValid { .. } | Expired(_) => ErrorKind::Temporal,
            UnsecuredNotConfirmed => ErrorKind::UnsecuredNotConfirmed,
            Schema { .. } => ErrorKind::Schema,
            DomainMismatch { .. } => ErrorKind::DomainMismatch,
            InvalidHost(_) | EmptyBody(_) | KeyFetch(_) | InvalidKey(_) | InvalidKeyFormat(_) => {
                ErrorKind::KeyResolution
            }
            Registry(_) => ErrorKind::Registry,
            DynamicClientImmutable | UnsupportedClaim(_) => {
                ErrorKind::UnsupportedOperation
            }
            Timeout { .. } => ErrorKind::Timeout,
            MissingConfiguration(_) | InvalidConfiguration(_) | InvalidUrl(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// The HTTP status an endpoint layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Format
            | ErrorKind::Schema
            | ErrorKind::DomainMismatch
            | ErrorKind::UnsecuredNotConfirmed
            | ErrorKind::UnsupportedOperation => 400,
            ErrorKind::Algorithm | ErrorKind::Signature | ErrorKind::Temporal => 401,
            ErrorKind::KeyResolution => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Registry | ErrorKind::Configuration => 500,
        }
    }

    /// Whether the same request may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
