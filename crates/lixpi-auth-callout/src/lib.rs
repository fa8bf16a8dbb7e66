//! # Lixpi auth callout
//!
//! Decentralised NATS authorization: the broker delegates every connection
//! attempt to [`AuthCalloutBridge`], which verifies the client's OIDC bearer
//! token and answers with a broker-native user JWT scoped by the
//! `{userId}`-templated permissions of the subscription manifest.
//!
//! * [`KeyMaterial`]: issuer NKey and curve XKey, loaded once from seeds.
//! * [`resolve_permissions`]: user id + manifest → [`PermissionSet`].
//! * [`TokenVerifier`] / [`JwksClient`]: bearer-token verification against a
//!   rotating key set.
//! * [`TokenAuthMiddleware`]: the same verification as a message middleware
//!   for application subjects.

pub mod bridge;
pub mod config;
pub mod error;
pub mod jwks;
pub mod keys;
pub mod middleware;
pub mod nats_jwt;
pub mod permissions;
pub mod verify;

#[cfg(test)]
mod testing;

pub use bridge::{AUTH_CALLOUT_SUBJECT, AuthCalloutBridge, SERVER_XKEY_HEADER};
pub use config::CalloutConfig;
pub use error::{CalloutError, ConfigError};
pub use jwks::JwksClient;
pub use keys::KeyMaterial;
pub use middleware::TokenAuthMiddleware;
pub use permissions::{INBOX_WILDCARD, PermissionSet, resolve_permissions};
pub use verify::{IdentityClaims, TokenVerifier};
