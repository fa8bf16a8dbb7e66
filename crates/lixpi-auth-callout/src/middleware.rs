//! Bearer-token middleware for application subjects.
//!
//! Services that accept JSON requests carrying a `token` field install
//! [`TokenAuthMiddleware`] in their pipeline. The token is verified,
//! stripped from the payload and replaced by `user: { userId }`.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use futures::future::BoxFuture;
use lixpi_nats::{MessageContext, Middleware};
use serde_json::{Value, json};
use tracing::debug;

use crate::verify::TokenVerifier;

pub struct TokenAuthMiddleware {
    verifier: Arc<TokenVerifier>,
}

impl TokenAuthMiddleware {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    async fn authenticate(&self, mut ctx: MessageContext) -> anyhow::Result<MessageContext> {
        let token = ctx
            .data
            .as_json()
            .and_then(|body| body.get("token"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("authentication required: no token provided"))?;

        let claims = self
            .verifier
            .verify(&token)
            .await
            .context("authentication failed")?;
        let user_id = claims.user_id().context("authentication failed")?.to_owned();

        let body = ctx
            .data
            .as_json_mut()
            .and_then(Value::as_object_mut)
            .ok_or_else(|| anyhow!("authentication required: payload is not a JSON object"))?;
        body.remove("token");
        body.insert("user".into(), json!({ "userId": user_id }));

        debug!(subject = %ctx.message.subject, %user_id, "request authenticated");
        Ok(ctx)
    }
}

impl Middleware for TokenAuthMiddleware {
    fn handle(&self, ctx: MessageContext) -> BoxFuture<'_, anyhow::Result<MessageContext>> {
        Box::pin(self.authenticate(ctx))
    }
}
