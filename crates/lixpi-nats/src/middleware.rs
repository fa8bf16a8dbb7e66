//! Ordered transform stages applied to inbound messages.
//!
//! A [`MiddlewarePipeline`] runs every stage strictly in declaration order.
//! Each stage receives the [`MessageContext`] produced by the previous one
//! and may rewrite the decoded payload. Returning an error aborts the rest of
//! the chain for that one message; the subscription loop moves on to the
//! next message.
//!
//! Closures of the shape `Fn(MessageContext) -> impl Future<Output =
//! anyhow::Result<MessageContext>>` implement [`Middleware`] directly:
//!
//! ```rust
//! use lixpi_nats::{MessageContext, MiddlewarePipeline};
//!
//! let pipeline = MiddlewarePipeline::new()
//!     .with(|mut ctx: MessageContext| async move {
//!         if let Some(body) = ctx.data.as_json_mut() {
//!             body["seen"] = serde_json::Value::Bool(true);
//!         }
//!         Ok::<_, anyhow::Error>(ctx)
//!     });
//! assert_eq!(pipeline.len(), 1);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_nats::Message;
use futures::future::BoxFuture;

use crate::payload::Payload;

/// The decoded payload travelling through the chain, plus the raw message
/// it came from.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub data: Payload,
    pub message: Message,
}

impl MessageContext {
    pub fn new(data: Payload, message: Message) -> Self {
        Self { data, message }
    }
}

/// A single pipeline stage.
pub trait Middleware: Send + Sync {
    /// Transform the context, or fail to drop the message.
    fn handle(&self, ctx: MessageContext) -> BoxFuture<'_, anyhow::Result<MessageContext>>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(MessageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<MessageContext>> + Send + 'static,
{
    fn handle(&self, ctx: MessageContext) -> BoxFuture<'_, anyhow::Result<MessageContext>> {
        Box::pin(self(ctx))
    }
}

/// An ordered list of [`Middleware`] stages.
///
/// Cloning is cheap: stages are reference counted and shared by every
/// subscription loop that runs the pipeline.
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage to the end of the chain.
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, stage: M) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append an already shared stage.
    #[must_use]
    pub fn with_shared(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage in order, threading the context through.
    pub async fn run(&self, mut ctx: MessageContext) -> anyhow::Result<MessageContext> {
        for stage in &self.stages {
            ctx = stage.handle(ctx).await?;
        }
        Ok(ctx)
    }
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::test_support::message;

    fn json_ctx(value: serde_json::Value) -> MessageContext {
        MessageContext::new(Payload::Json(value), message("documents.get", b"{}"))
    }

    #[tokio::test]
    async fn empty_pipeline_is_identity() {
        let pipeline = MiddlewarePipeline::new();
        let out = pipeline.run(json_ctx(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(out.data, Payload::Json(json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn stages_run_in_declared_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);

        let pipeline = MiddlewarePipeline::new()
            .with(move |mut ctx: MessageContext| {
                first.lock().unwrap().push("first");
                async move {
                    ctx.data.as_json_mut().unwrap()["trail"] = json!(["first"]);
                    Ok::<_, anyhow::Error>(ctx)
                }
            })
            .with(move |mut ctx: MessageContext| {
                second.lock().unwrap().push("second");
                async move {
                    // sees the previous stage's output
                    let trail = ctx.data.as_json_mut().unwrap()["trail"]
                        .as_array_mut()
                        .unwrap();
                    trail.push(json!("second"));
                    Ok::<_, anyhow::Error>(ctx)
                }
            });

        let out = pipeline.run(json_ctx(json!({}))).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(out.data.as_json().unwrap()["trail"], json!(["first", "second"]));
    }

    #[tokio::test]
    async fn failing_stage_aborts_remaining_chain() {
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);

        let pipeline = MiddlewarePipeline::new()
            .with(|_ctx: MessageContext| async move {
                Err::<MessageContext, _>(anyhow::anyhow!("rejected"))
            })
            .with(move |ctx: MessageContext| {
                *flag.lock().unwrap() = true;
                async move { Ok::<_, anyhow::Error>(ctx) }
            });

        let err = pipeline.run(json_ctx(json!({}))).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert!(!*reached.lock().unwrap());
    }
}
