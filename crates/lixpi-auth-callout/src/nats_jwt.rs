//! Broker-native JWT codec.
//!
//! NATS JWTs are ordinary three-part JWTs signed with an Ed25519 NKey
//! (`alg: ed25519-nkey`). Authorization requests arrive as such a JWT
//! signed by the server; we answer with two of our own: the user
//! credential and the authorization response wrapping it.

use std::time::{Duration, SystemTime};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use nkeys::KeyPair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CalloutError;
use crate::permissions::PermissionSet;

/// Claim `type` of an issued user credential.
pub const USER_CLAIM_TYPE: &str = "user";

/// Claim `type` of the callout response.
pub const AUTHORIZATION_RESPONSE_CLAIM_TYPE: &str = "authorization_response";

const CLAIMS_VERSION: u8 = 2;

// ---------------------------------------------------------------------------
// Authorization request (sent by the server)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequestClaims {
    pub nats: AuthorizationRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequest {
    pub server_id: ServerId,
    /// Per-connection public NKey the issued credential is bound to.
    pub user_nkey: String,
    #[serde(default)]
    pub connect_opts: ConnectOpts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerId {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// The subset of the client's CONNECT options we look at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectOpts {
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

// ---------------------------------------------------------------------------
// Issued claims
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UserClaims<'a> {
    jti: String,
    iat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
    iss: String,
    name: &'a str,
    sub: &'a str,
    aud: &'a str,
    nats: UserNats<'a>,
}

#[derive(Debug, Serialize)]
struct UserNats<'a> {
    #[serde(flatten)]
    permissions: &'a PermissionSet,
    #[serde(rename = "type")]
    claim_type: &'static str,
    version: u8,
}

#[derive(Debug, Serialize)]
struct AuthorizationResponseClaims<'a> {
    jti: String,
    iat: u64,
    iss: String,
    sub: &'a str,
    aud: &'a str,
    nats: AuthorizationResponse<'a>,
}

#[derive(Debug, Serialize)]
struct AuthorizationResponse<'a> {
    jwt: &'a str,
    #[serde(rename = "type")]
    claim_type: &'static str,
    version: u8,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Sign a user credential binding `user_nkey` to `permissions`.
///
/// * `user_id` becomes the JWT `name`.
/// * `account` is the auth account the user is placed in (`aud`).
/// * `ttl`, when set, adds an `exp` claim.
pub fn issue_user(
    signer: &KeyPair,
    user_id: &str,
    user_nkey: &str,
    account: &str,
    permissions: &PermissionSet,
    ttl: Option<Duration>,
) -> Result<String, CalloutError> {
    let iat = now_secs();
    let claims = UserClaims {
        jti: uuid::Uuid::new_v4().to_string(),
        iat,
        exp: ttl.map(|ttl| iat + ttl.as_secs()),
        iss: signer.public_key(),
        name: user_id,
        sub: user_nkey,
        aud: account,
        nats: UserNats {
            permissions,
            claim_type: USER_CLAIM_TYPE,
            version: CLAIMS_VERSION,
        },
    };
    encode(signer, &claims)
}

/// Sign the callout response carrying `user_jwt` back to `server_id`.
pub fn issue_authorization_response(
    signer: &KeyPair,
    user_nkey: &str,
    server_id: &str,
    user_jwt: &str,
) -> Result<String, CalloutError> {
    let claims = AuthorizationResponseClaims {
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now_secs(),
        iss: signer.public_key(),
        sub: user_nkey,
        aud: server_id,
        nats: AuthorizationResponse {
            jwt: user_jwt,
            claim_type: AUTHORIZATION_RESPONSE_CLAIM_TYPE,
            version: CLAIMS_VERSION,
        },
    };
    encode(signer, &claims)
}

/// Encode claims as a NATS JWT: `base64url(header).base64url(body).base64url(sig)`.
pub fn encode<C: Serialize + ?Sized>(signer: &KeyPair, claims: &C) -> Result<String, CalloutError> {
    let header = serde_json::json!({
        "typ": "JWT",
        "alg": "ed25519-nkey"
    });

    let encoded_header = URL_SAFE_NO_PAD.encode(serde_json::to_string(&header)?);
    let encoded_body = URL_SAFE_NO_PAD.encode(serde_json::to_string(claims)?);
    let signing_input = format!("{encoded_header}.{encoded_body}");

    let sig = signer
        .sign(signing_input.as_bytes())
        .map_err(|e| CalloutError::Signing(e.to_string()))?;
    let encoded_sig = URL_SAFE_NO_PAD.encode(sig);

    Ok(format!("{signing_input}.{encoded_sig}"))
}

/// Decode a JWT's claims without checking its signature.
pub fn decode_unverified<T: DeserializeOwned>(jwt: &str) -> Result<T, CalloutError> {
    let body = jwt_parts(jwt)?.1;
    let bytes = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| CalloutError::MalformedRequest(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| CalloutError::MalformedRequest(e.to_string()))
}

/// Check a NATS JWT's signature against the issuer's public key.
pub fn verify_signature(jwt: &str, issuer: &str) -> Result<(), CalloutError> {
    let (header, body, sig) = jwt_parts(jwt)?;
    let sig = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|e| CalloutError::MalformedRequest(e.to_string()))?;
    let verifier =
        KeyPair::from_public_key(issuer).map_err(|e| CalloutError::Signing(e.to_string()))?;
    verifier
        .verify(format!("{header}.{body}").as_bytes(), &sig)
        .map_err(|e| CalloutError::Signing(e.to_string()))
}

fn jwt_parts(jwt: &str) -> Result<(&str, &str, &str), CalloutError> {
    let mut parts = jwt.trim().split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(body), Some(sig), None) => Ok((header, body, sig)),
        _ => Err(CalloutError::MalformedRequest(
            "expected a three-part JWT".into(),
        )),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
