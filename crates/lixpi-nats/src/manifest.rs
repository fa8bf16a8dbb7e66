//! Declarative subscription manifest.
//!
//! Services describe the subjects they serve as a list of
//! [`SubjectSubscription`]s. The [`ConnectionManager`](crate::ConnectionManager)
//! registers the whole list once per connection epoch, and the auth callout
//! reads the same list to derive per-user permissions from the
//! `{userId}`-templated allow lists.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_nats::Message;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::payload::{Payload, PayloadType};

/// Placeholder substituted with the authenticated user id in permission
/// templates.
pub const USER_ID_PLACEHOLDER: &str = "{userId}";

/// Handler for fire-and-forget messages.
pub type MessageHandler =
    Arc<dyn Fn(Payload, Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handler for request/reply subjects; its return value is sent back to
/// the requester.
pub type ReplyHandler =
    Arc<dyn Fn(Payload, Message) -> BoxFuture<'static, anyhow::Result<Payload>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Payload, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |data, msg| Box::pin(f(data, msg)))
}

/// Wrap an async closure as a [`ReplyHandler`].
pub fn reply_handler<F, Fut>(f: F) -> ReplyHandler
where
    F: Fn(Payload, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
{
    Arc::new(move |data, msg| Box::pin(f(data, msg)))
}

/// Whether a subscription consumes messages or answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Subscribe,
    Reply,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => f.write_str("subscribe"),
            Self::Reply => f.write_str("reply"),
        }
    }
}

/// The handler bound to a manifest entry. The variant decides the
/// subscription kind.
#[derive(Clone)]
pub enum SubjectHandler {
    Subscribe(MessageHandler),
    Reply(ReplyHandler),
}

impl SubjectHandler {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Subscribe(_) => SubscriptionKind::Subscribe,
            Self::Reply(_) => SubscriptionKind::Reply,
        }
    }
}

impl fmt::Debug for SubjectHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectHandler::{}", self.kind())
    }
}

/// A list of subject patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowList {
    #[serde(default)]
    pub allow: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: subjects.into_iter().map(Into::into).collect(),
        }
    }
}

/// Publish / subscribe permission templates attached to a manifest entry.
///
/// Subjects may contain [`USER_ID_PLACEHOLDER`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPermissions {
    #[serde(rename = "pub", default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<AllowList>,
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<AllowList>,
}

/// A single manifest entry.
#[derive(Debug, Clone)]
pub struct SubjectSubscription {
    pub subject: String,
    pub queue: Option<String>,
    pub payload_type: PayloadType,
    pub permissions: Option<SubjectPermissions>,
    pub handler: SubjectHandler,
}

impl SubjectSubscription {
    /// Declare a fire-and-forget subscription.
    pub fn subscribe(subject: impl Into<String>, handler: MessageHandler) -> Self {
        Self {
            subject: subject.into(),
            queue: None,
            payload_type: PayloadType::Json,
            permissions: None,
            handler: SubjectHandler::Subscribe(handler),
        }
    }

    /// Declare a request/reply subscription.
    pub fn reply(subject: impl Into<String>, handler: ReplyHandler) -> Self {
        Self {
            subject: subject.into(),
            queue: None,
            payload_type: PayloadType::Json,
            permissions: None,
            handler: SubjectHandler::Reply(handler),
        }
    }

    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    #[must_use]
    pub fn payload_type(mut self, payload_type: PayloadType) -> Self {
        self.payload_type = payload_type;
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: SubjectPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.handler.kind()
    }
}
