//! # Lixpi NATS
//!
//! A single, process-wide NATS connection with:
//!
//! * [`ConnectionManager`]: connect with a bounded first attempt and
//!   background retries, status monitoring, publish / subscribe / reply /
//!   request, drain and disconnect.
//! * [`MiddlewarePipeline`]: ordered transform stages run on every inbound
//!   message before its handler.
//! * [`SubjectSubscription`]: declarative subscription manifest, registered
//!   once per connection epoch and carrying per-subject permission
//!   templates.
//! * [`PayloadType`]: JSON or raw buffer encoding per subject.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lixpi_nats::{
//!     ConnectionManager, NatsServiceConfig, Payload, SubjectSubscription, reply_handler,
//! };
//!
//! # async fn run() {
//! let config = NatsServiceConfig::default()
//!     .servers(["nats://localhost:4222"])
//!     .name("documents-service")
//!     .subscriptions(vec![SubjectSubscription::reply(
//!         "documents.ping",
//!         reply_handler(|_data, _msg| async move {
//!             Ok(Payload::Json(serde_json::json!({ "pong": true })))
//!         }),
//!     )]);
//!
//! let nats = ConnectionManager::init(config).await;
//! // ...
//! nats.drain().await.ok();
//! # }
//! ```

pub mod config;
mod dispatch;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod middleware;
pub mod payload;
pub mod registry;
pub mod status;

pub use config::{NatsAuth, NatsServiceConfig};
pub use error::NatsError;
pub use manager::{ConnectionManager, SubscriptionOptions};
pub use manifest::{
    AllowList, MessageHandler, ReplyHandler, SubjectHandler, SubjectPermissions,
    SubjectSubscription, SubscriptionKind, USER_ID_PLACEHOLDER, message_handler, reply_handler,
};
pub use middleware::{MessageContext, Middleware, MiddlewarePipeline};
pub use payload::{Payload, PayloadType};
pub use registry::{SubscriptionHandle, SubscriptionRegistry, subject_matches};
pub use status::{ConnectionState, StatusEvent};

// Re-exported so handlers can name message types without a direct
// async-nats dependency.
pub use async_nats;

#[cfg(test)]
pub(crate) mod test_support;
