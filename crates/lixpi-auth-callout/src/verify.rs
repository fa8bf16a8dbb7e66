//! Bearer-token verification.

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CalloutError;
use crate::jwks::JwksClient;

/// The identity claims we read from a verified token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    /// A string or an array of strings.
    #[serde(default)]
    pub aud: Option<Value>,
}

impl IdentityClaims {
    /// The non-empty `sub` claim.
    pub fn user_id(&self) -> Result<&str, CalloutError> {
        self.sub
            .as_deref()
            .filter(|sub| !sub.is_empty())
            .ok_or(CalloutError::MissingSubject)
    }
}

/// Verifies externally issued bearer tokens against a JWKS endpoint.
pub struct TokenVerifier {
    jwks: JwksClient,
    audience: String,
    issuer: String,
    algorithms: Vec<Algorithm>,
}

impl TokenVerifier {
    pub fn new(
        jwks: JwksClient,
        audience: impl Into<String>,
        issuer: impl Into<String>,
        algorithms: Vec<Algorithm>,
    ) -> Self {
        Self {
            jwks,
            audience: audience.into(),
            issuer: issuer.into(),
            algorithms,
        }
    }

    /// Check signature, audience, issuer, expiry and algorithm.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, CalloutError> {
        let header = decode_header(token)?;
        if !self.algorithms.contains(&header.alg) {
            return Err(CalloutError::AlgorithmNotAllowed(format!("{:?}", header.alg)));
        }

        let key = self.jwks.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        Ok(decode::<IdentityClaims>(token, &key, &validation)?.claims)
    }
}
