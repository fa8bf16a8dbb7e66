//! The auth callout bridge.
//!
//! The broker forwards every connection attempt to [`AUTH_CALLOUT_SUBJECT`]
//! as an XKey-sealed authorization request. The bridge opens it, verifies
//! the client's bearer token, resolves the user's permissions and answers
//! with a signed authorization response. Any failure answers with an empty
//! body, which the broker treats as a denial.

use std::sync::Arc;
use std::time::Duration;

use async_nats::Message;
use bytes::Bytes;
use lixpi_nats::{
    ConnectionManager, Payload, PayloadType, SubjectPermissions, SubjectSubscription,
    SubscriptionHandle, SubscriptionOptions, reply_handler,
};
use nkeys::XKey;
use tracing::{info, warn};

use crate::error::CalloutError;
use crate::keys::KeyMaterial;
use crate::nats_jwt::{self, AuthorizationRequestClaims};
use crate::permissions::resolve_permissions;
use crate::verify::TokenVerifier;

/// Reserved subject the broker sends authorization requests to.
pub const AUTH_CALLOUT_SUBJECT: &str = "$SYS.REQ.USER.AUTH";

/// Header carrying the server's ephemeral curve public key.
pub const SERVER_XKEY_HEADER: &str = "Nats-Server-Xkey";

#[derive(Clone)]
pub struct AuthCalloutBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    keys: KeyMaterial,
    verifier: TokenVerifier,
    permissions: Vec<SubjectPermissions>,
    auth_account: String,
    credential_ttl: Option<Duration>,
}

impl AuthCalloutBridge {
    pub fn new(
        keys: KeyMaterial,
        verifier: TokenVerifier,
        permissions: Vec<SubjectPermissions>,
        auth_account: impl Into<String>,
        credential_ttl: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                keys,
                verifier,
                permissions,
                auth_account: auth_account.into(),
                credential_ttl,
            }),
        }
    }

    /// Manifest entry answering [`AUTH_CALLOUT_SUBJECT`] with raw buffers.
    ///
    /// Add it to the connection manager's subscriptions so it is registered
    /// on every connection epoch.
    pub fn subscription(&self) -> SubjectSubscription {
        SubjectSubscription::reply(AUTH_CALLOUT_SUBJECT, self.handler())
            .payload_type(PayloadType::Buffer)
    }

    /// Register the bridge on an already connected manager.
    pub async fn start(&self, nats: &ConnectionManager) -> Option<SubscriptionHandle> {
        let handle = nats
            .reply(
                AUTH_CALLOUT_SUBJECT,
                self.handler(),
                SubscriptionOptions::default(),
                PayloadType::Buffer,
            )
            .await;
        if handle.is_some() {
            info!(subject = AUTH_CALLOUT_SUBJECT, "NATS auth callout service started");
        }
        handle
    }

    fn handler(&self) -> lixpi_nats::ReplyHandler {
        let bridge = self.clone();
        reply_handler(move |_data, message| {
            let bridge = bridge.clone();
            async move { Ok(Payload::Buffer(bridge.authorize(&message).await)) }
        })
    }

    /// Answer one authorization request.
    ///
    /// Returns the signed authorization response, or an empty body on any
    /// failure.
    pub async fn authorize(&self, message: &Message) -> Bytes {
        match self.try_authorize(message).await {
            Ok(response) => Bytes::from(response),
            Err(e) => {
                warn!(error = %e, "auth callout denied connection");
                Bytes::new()
            }
        }
    }

    async fn try_authorize(&self, message: &Message) -> Result<String, CalloutError> {
        let inner = &self.inner;

        let server_xkey = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(SERVER_XKEY_HEADER))
            .map(|value| value.as_str().trim())
            .filter(|value| !value.is_empty())
            .ok_or(CalloutError::MissingServerXkey)?;
        let server_xkey = XKey::from_public_key(server_xkey)
            .map_err(|e| CalloutError::InvalidServerXkey(e.to_string()))?;

        let opened = inner
            .keys
            .encryption()
            .open(&message.payload, &server_xkey)
            .map_err(|e| CalloutError::Decrypt(e.to_string()))?;
        let request_jwt = std::str::from_utf8(&opened)
            .map_err(|e| CalloutError::MalformedRequest(e.to_string()))?;
        let request: AuthorizationRequestClaims = nats_jwt::decode_unverified(request_jwt)?;
        let request = request.nats;

        let token = request
            .connect_opts
            .auth_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or(CalloutError::MissingToken)?;

        let claims = inner.verifier.verify(token).await?;
        let user_id = claims.user_id()?;

        let permissions = resolve_permissions(user_id, &inner.permissions);

        let signer = inner.keys.signing();
        let user_jwt = nats_jwt::issue_user(
            signer,
            user_id,
            &request.user_nkey,
            &inner.auth_account,
            &permissions,
            inner.credential_ttl,
        )?;
        let response = nats_jwt::issue_authorization_response(
            signer,
            &request.user_nkey,
            &request.server_id.id,
            &user_jwt,
        )?;

        info!(
            %user_id,
            user_nkey = %request.user_nkey,
            server = %request.server_id.name,
            publish = permissions.publish.allow.len(),
            subscribe = permissions.subscribe.allow.len(),
            "auth callout authorized connection"
        );
        Ok(response)
    }
}
