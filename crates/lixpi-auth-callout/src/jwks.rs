//! Remote key-set (JWKS) client.
//!
//! Keys are fetched lazily and cached. A token naming a `kid` the cache
//! does not know triggers one refetch, which is how rotated provider keys
//! are picked up.

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CalloutError;

pub struct JwksClient {
    uri: String,
    http: reqwest::Client,
    cache: RwLock<Option<JwkSet>>,
}

impl JwksClient {
    pub fn new(uri: impl Into<String>) -> Self {
        Self::with_client(uri, reqwest::Client::new())
    }

    pub fn with_client(uri: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            uri: uri.into(),
            http,
            cache: RwLock::new(None),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Resolve the verification key for a token's `kid`.
    ///
    /// Tokens without a `kid` are accepted only when the key set holds a
    /// single key.
    pub async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, CalloutError> {
        if let Some(set) = self.cache.read().await.as_ref() {
            if let Some(jwk) = select(set, kid) {
                return Ok(DecodingKey::from_jwk(jwk)?);
            }
        }

        let set = self.fetch().await?;
        let key = select(&set, kid).map(DecodingKey::from_jwk).transpose()?;
        *self.cache.write().await = Some(set);

        key.ok_or_else(|| CalloutError::UnknownKey(kid.unwrap_or("<none>").to_string()))
    }

    async fn fetch(&self) -> Result<JwkSet, CalloutError> {
        debug!(uri = %self.uri, "fetching key set");
        let set: JwkSet = self
            .http
            .get(&self.uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!(uri = %self.uri, keys = set.keys.len(), "key set refreshed");
        Ok(set)
    }
}

fn select<'a>(set: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => set.find(kid),
        None if set.keys.len() == 1 => set.keys.first(),
        None => None,
    }
}
