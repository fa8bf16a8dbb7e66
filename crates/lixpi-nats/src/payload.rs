//! Payload encodings carried on subjects.
//!
//! Every subscription declares a [`PayloadType`]. Inbound bytes are decoded
//! into a [`Payload`] before the middleware chain sees them, and reply
//! payloads are encoded back with the same strategy.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NatsError;

/// How a subject's message bodies are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// UTF-8 JSON text.
    #[default]
    Json,
    /// Raw bytes, passed through unmodified.
    Buffer,
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Buffer => f.write_str("buffer"),
        }
    }
}

/// A decoded message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Buffer(Bytes),
}

impl PayloadType {
    /// Decode raw message bytes according to this payload type.
    pub fn decode(self, bytes: &Bytes) -> Result<Payload, NatsError> {
        match self {
            Self::Json => Ok(Payload::Json(serde_json::from_slice(bytes)?)),
            Self::Buffer => Ok(Payload::Buffer(bytes.clone())),
        }
    }

    /// Encode a payload for the wire.
    ///
    /// The payload variant must match this type; a JSON subscription cannot
    /// answer with raw bytes and vice versa.
    pub fn encode(self, payload: Payload) -> Result<Bytes, NatsError> {
        match (self, payload) {
            (Self::Json, Payload::Json(value)) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
            (Self::Buffer, Payload::Buffer(bytes)) => Ok(bytes),
            (expected, payload) => Err(NatsError::PayloadMismatch {
                expected,
                found: payload.payload_type(),
            }),
        }
    }

    /// Body sent back when a reply handler fails.
    pub(crate) fn error_reply(self, message: &str) -> Bytes {
        match self {
            Self::Json => Bytes::from(serde_json::json!({ "error": message }).to_string()),
            Self::Buffer => Bytes::new(),
        }
    }
}

impl Payload {
    /// The [`PayloadType`] this payload encodes as.
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::Json(_) => PayloadType::Json,
            Self::Buffer(_) => PayloadType::Buffer,
        }
    }

    /// Borrow the JSON value, if this is a JSON payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Buffer(_) => None,
        }
    }

    /// Mutably borrow the JSON value, if this is a JSON payload.
    pub fn as_json_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Buffer(_) => None,
        }
    }

    /// Borrow the raw bytes, if this is a buffer payload.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffer(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}
