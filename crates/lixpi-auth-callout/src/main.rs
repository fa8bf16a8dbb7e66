//! Lixpi auth callout service.
//!
//! Connects to NATS, answers `$SYS.REQ.USER.AUTH` until Ctrl-C, then drains.

use anyhow::Context;
use lixpi_auth_callout::{
    AuthCalloutBridge, CalloutConfig, JwksClient, KeyMaterial, TokenVerifier,
};
use lixpi_nats::ConnectionManager;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging (controlled via RUST_LOG env var).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = CalloutConfig::from_env().context("invalid configuration")?;

    let keys = KeyMaterial::from_seeds(config.nkey_seed.expose(), config.xkey_seed.expose())
        .context("failed to load issuer keys")?;
    info!(issuer = %keys.issuer(), xkey = %keys.xkey_public(), "issuer keys loaded");

    let permissions = config.load_permissions()?;
    info!(
        templates = permissions.len(),
        account = %config.auth_account,
        "permission manifest loaded"
    );

    let verifier = TokenVerifier::new(
        JwksClient::new(&config.jwks_uri),
        &config.audience,
        &config.issuer,
        config.algorithms.clone(),
    );
    info!(jwks_uri = %config.jwks_uri, issuer = %config.issuer, "OIDC provider registered");

    let bridge = AuthCalloutBridge::new(
        keys,
        verifier,
        permissions,
        &config.auth_account,
        config.credential_ttl,
    );

    // The bridge is part of the manifest so it is re-registered on every
    // connection epoch.
    let nats = ConnectionManager::new(
        config
            .nats_config()
            .subscriptions(vec![bridge.subscription()]),
    );
    nats.connect().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    nats.drain().await?;
    Ok(())
}
