//! Error types for the auth callout.
//!
//! [`CalloutError`] covers everything that can go wrong while handling a
//! single authorization request. Every variant ends in a denial; none of
//! them are ever propagated past the bridge. [`ConfigError`] is raised at
//! startup and is fatal.

/// Failure while authorizing one connection.
#[derive(Debug, thiserror::Error)]
pub enum CalloutError {
    /// The request carries no `Nats-Server-Xkey` header.
    #[error("missing Nats-Server-Xkey in request headers")]
    MissingServerXkey,

    /// The header is present but is not a curve public key.
    #[error("invalid server xkey: {0}")]
    InvalidServerXkey(String),

    /// The request body could not be opened with our xkey.
    #[error("curve decryption failed: {0}")]
    Decrypt(String),

    /// The decrypted request is not a well-formed authorization request.
    #[error("malformed authorization request: {0}")]
    MalformedRequest(String),

    /// No bearer token in the client's connect options.
    #[error("token missing in client connect options")]
    MissingToken,

    /// The token's algorithm is not in the configured allow list.
    #[error("token algorithm {0} is not allowed")]
    AlgorithmNotAllowed(String),

    /// The key set has no key for the token's `kid`.
    #[error("no signing key found for kid {0}")]
    UnknownKey(String),

    /// The key-set endpoint could not be reached or returned an error.
    #[error("failed to fetch key set: {0}")]
    Jwks(#[from] reqwest::Error),

    /// Signature, audience, issuer or expiry check failed.
    #[error("token verification failed: {0}")]
    TokenRejected(#[from] jsonwebtoken::errors::Error),

    /// The verified token has no `sub` claim.
    #[error("user id (\"sub\") missing in token claims")]
    MissingSubject,

    /// An NKey signing operation failed.
    #[error("NKey error: {0}")]
    Signing(String),

    /// JSON (de)serialisation error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid or incomplete startup configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to load permissions from {path}: {reason}")]
    Permissions { path: String, reason: String },
}
