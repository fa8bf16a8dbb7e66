//! Per-subscription consumption loops.
//!
//! Every `subscribe()` / `reply()` spawns one of these loops. A loop handles
//! its messages strictly one at a time, in arrival order. Any failure while
//! handling a message (decode, middleware, handler error or panic) is logged
//! with the message's subject and headers and the loop carries on.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_nats::{Client, Message};
use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::manifest::{MessageHandler, ReplyHandler};
use crate::middleware::{MessageContext, MiddlewarePipeline};
use crate::payload::PayloadType;

/// Consume a subscription until its stream ends.
pub(crate) async fn run_subscription<S>(
    subject: String,
    mut messages: S,
    payload_type: PayloadType,
    pipeline: MiddlewarePipeline,
    handler: MessageHandler,
) where
    S: Stream<Item = Message> + Unpin,
{
    while let Some(message) = messages.next().await {
        deliver(&subject, message, payload_type, &pipeline, &handler).await;
    }
    debug!(%subject, "subscription loop ended");
}

/// Consume a reply subscription until its stream ends, answering every
/// request through `client`.
pub(crate) async fn run_reply<S>(
    subject: String,
    client: Client,
    mut messages: S,
    payload_type: PayloadType,
    pipeline: MiddlewarePipeline,
    handler: ReplyHandler,
) where
    S: Stream<Item = Message> + Unpin,
{
    while let Some(message) = messages.next().await {
        let reply_to = message.reply.clone();
        let body = respond(&subject, message, payload_type, &pipeline, &handler).await;

        let Some(reply_to) = reply_to else {
            warn!(%subject, "request has no reply subject, response dropped");
            continue;
        };
        if let Err(e) = client.publish(reply_to, body).await {
            error!(%subject, error = %e, "failed to send reply");
        }
    }
    debug!(%subject, "reply loop ended");
}

/// Decode, run the middleware chain and invoke a message handler.
pub(crate) async fn deliver(
    subject: &str,
    message: Message,
    payload_type: PayloadType,
    pipeline: &MiddlewarePipeline,
    handler: &MessageHandler,
) {
    let snapshot = message.clone();
    let outcome = isolate(async move {
        let data = payload_type.decode(&message.payload)?;
        let ctx = pipeline.run(MessageContext::new(data, message)).await?;
        handler(ctx.data, ctx.message).await
    })
    .await;

    if let Err(e) = outcome {
        log_failure("Error processing message", subject, &snapshot, payload_type, &e);
    }
}

/// Decode, run the middleware chain and invoke a reply handler.
///
/// Always produces a body: the encoded handler result, or an error reply
/// shaped for `payload_type`.
pub(crate) async fn respond(
    subject: &str,
    message: Message,
    payload_type: PayloadType,
    pipeline: &MiddlewarePipeline,
    handler: &ReplyHandler,
) -> Bytes {
    let snapshot = message.clone();
    let outcome = isolate(async move {
        let data = payload_type.decode(&message.payload)?;
        let ctx = pipeline.run(MessageContext::new(data, message)).await?;
        let result = handler(ctx.data, ctx.message).await?;
        Ok(payload_type.encode(result)?)
    })
    .await;

    match outcome {
        Ok(body) => body,
        Err(e) => {
            log_failure("Reply error", subject, &snapshot, payload_type, &e);
            payload_type.error_reply(&e.to_string())
        }
    }
}

/// Run a per-message future, turning a panic into an error.
async fn isolate<F, T>(work: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

fn log_failure(
    what: &str,
    subject: &str,
    message: &Message,
    payload_type: PayloadType,
    e: &anyhow::Error,
) {
    let headers = message.headers.as_ref().map_or_else(
        || "no headers".to_string(),
        |headers| {
            headers
                .iter()
                .map(|(name, values)| format!("{name:?}={values:?}"))
                .collect::<Vec<_>>()
                .join(", ")
        },
    );
    let data = if message.payload.is_empty() {
        "no data".into()
    } else {
        String::from_utf8_lossy(&message.payload)
    };

    error!(
        %subject,
        message_subject = %message.subject,
        %payload_type,
        headers = %headers,
        data = %data,
        error = %e,
        "{what} on subject {subject}"
    );
}
