//! Test fixtures: an in-process JWKS endpoint and RS256 token minting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::routing::get;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

pub const FIXTURE_KID: &str = "test-key-1";
pub const AUDIENCE: &str = "https://api.lixpi.test";
pub const ISSUER: &str = "https://auth.lixpi.test/";

const RSA_PEM: &str = include_str!("../testdata/oidc_rsa.pem");
const JWKS_JSON: &str = include_str!("../testdata/oidc_jwks.json");

pub fn fixture_jwks() -> Value {
    serde_json::from_str(JWKS_JSON).unwrap()
}

/// JWKS endpoint on an ephemeral localhost port.
pub struct JwksServer {
    addr: std::net::SocketAddr,
    keys: Arc<Mutex<Value>>,
    pub hits: Arc<AtomicUsize>,
}

impl JwksServer {
    pub async fn start(keys: Value) -> Self {
        let keys = Arc::new(Mutex::new(keys));
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new().route(
            "/.well-known/jwks.json",
            get({
                let keys = Arc::clone(&keys);
                let hits = Arc::clone(&hits);
                move || {
                    let body = keys.lock().unwrap().clone();
                    hits.fetch_add(1, Ordering::SeqCst);
                    async move { axum::Json(body) }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, keys, hits }
    }

    pub fn uri(&self) -> String {
        format!("http://{}/.well-known/jwks.json", self.addr)
    }

    /// Swap the served key set (simulates provider key rotation).
    pub fn replace(&self, keys: Value) {
        *self.keys.lock().unwrap() = keys;
    }
}

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Claims of a valid token for `sub`, one hour from expiry.
pub fn valid_claims(sub: &str) -> Value {
    json!({
        "sub": sub,
        "aud": AUDIENCE,
        "iss": ISSUER,
        "iat": now(),
        "exp": now() + 3600,
    })
}

/// Sign `claims` with the fixture RSA key under `kid`.
pub fn rs256_token(claims: &Value, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}
