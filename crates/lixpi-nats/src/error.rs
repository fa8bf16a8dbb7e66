//! Connection manager error types.
//!
//! [`NatsError`] is returned by every fallible operation in this crate.
//! Transport errors from `async-nats` are flattened into
//! [`NatsError::Nats`], except request timeouts and missing responders,
//! which keep their own variants.

use std::time::Duration;

use async_nats::RequestErrorKind;

use crate::payload::PayloadType;

/// Error type for connection manager operations.
#[derive(Debug, thiserror::Error)]
pub enum NatsError {
    /// Invalid configuration (bad server address, conflicting options).
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation needs a live connection and there is none.
    #[error("NATS client is not connected")]
    NotConnected,

    /// NATS transport error.
    #[error("NATS error: {0}")]
    Nats(String),

    /// A request received no reply within its timeout.
    #[error("request to {subject} timed out after {timeout_ms} ms")]
    Timeout { subject: String, timeout_ms: u128 },

    /// The broker reported that nothing is subscribed to the request's
    /// subject.
    #[error("no responders on {subject}")]
    NoResponders { subject: String },

    /// A reply handler returned a payload that does not match the
    /// subscription's declared payload type.
    #[error("payload type mismatch: expected {expected}, got {found}")]
    PayloadMismatch {
        expected: PayloadType,
        found: PayloadType,
    },

    /// JSON serialization / deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<async_nats::ConnectError> for NatsError {
    fn from(e: async_nats::ConnectError) -> Self {
        NatsError::Nats(e.to_string())
    }
}

impl From<async_nats::PublishError> for NatsError {
    fn from(e: async_nats::PublishError) -> Self {
        NatsError::Nats(e.to_string())
    }
}

impl From<async_nats::SubscribeError> for NatsError {
    fn from(e: async_nats::SubscribeError) -> Self {
        NatsError::Nats(e.to_string())
    }
}

impl NatsError {
    /// Classify a failed request so callers can tell a silent subject from
    /// one nobody listens on.
    pub(crate) fn from_request(
        subject: &str,
        timeout: Duration,
        e: &async_nats::RequestError,
    ) -> Self {
        match e.kind() {
            RequestErrorKind::TimedOut => NatsError::Timeout {
                subject: subject.to_string(),
                timeout_ms: timeout.as_millis(),
            },
            RequestErrorKind::NoResponders => NatsError::NoResponders {
                subject: subject.to_string(),
            },
            _ => NatsError::Nats(e.to_string()),
        }
    }
}
