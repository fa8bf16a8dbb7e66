//! Issuer key material.
//!
//! Two keypairs are loaded from seeds once at startup and never change:
//! the account NKey that signs every issued JWT, and the curve XKey that
//! opens encrypted authorization requests.

use std::fmt;

use nkeys::{KeyPair, XKey};

use crate::error::ConfigError;

pub struct KeyMaterial {
    signing: KeyPair,
    encryption: XKey,
}

impl KeyMaterial {
    pub fn new(signing: KeyPair, encryption: XKey) -> Self {
        Self {
            signing,
            encryption,
        }
    }

    /// Load both keypairs from their seeds.
    ///
    /// An empty or unparsable seed is a fatal configuration error.
    pub fn from_seeds(signing_seed: &str, xkey_seed: &str) -> Result<Self, ConfigError> {
        let signing_seed = signing_seed.trim();
        if signing_seed.is_empty() {
            return Err(ConfigError::Missing("NATS_AUTH_NKEY_ISSUER_SEED"));
        }
        let xkey_seed = xkey_seed.trim();
        if xkey_seed.is_empty() {
            return Err(ConfigError::Missing("NATS_AUTH_XKEY_ISSUER_SEED"));
        }

        let signing = KeyPair::from_seed(signing_seed).map_err(|e| ConfigError::Invalid {
            name: "NATS_AUTH_NKEY_ISSUER_SEED",
            reason: e.to_string(),
        })?;
        let encryption = XKey::from_seed(xkey_seed).map_err(|e| ConfigError::Invalid {
            name: "NATS_AUTH_XKEY_ISSUER_SEED",
            reason: e.to_string(),
        })?;

        Ok(Self::new(signing, encryption))
    }

    /// Keypair that signs user JWTs and authorization responses.
    pub fn signing(&self) -> &KeyPair {
        &self.signing
    }

    /// Curve keypair that opens authorization requests.
    pub fn encryption(&self) -> &XKey {
        &self.encryption
    }

    /// Public key placed in the `iss` claim of everything we sign.
    pub fn issuer(&self) -> String {
        self.signing.public_key()
    }

    pub fn xkey_public(&self) -> String {
        self.encryption.public_key()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("issuer", &self.issuer())
            .field("xkey", &self.xkey_public())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_seeds() {
        let account = KeyPair::new_account();
        let curve = XKey::new();
        let keys = KeyMaterial::from_seeds(&account.seed().unwrap(), &curve.seed().unwrap())
            .unwrap();

        assert_eq!(keys.issuer(), account.public_key());
        assert_eq!(keys.xkey_public(), curve.public_key());
        assert!(keys.issuer().starts_with('A'));
        assert!(keys.xkey_public().starts_with('X'));
    }

    #[test]
    fn missing_seeds_are_fatal() {
        let curve_seed = XKey::new().seed().unwrap();
        let account_seed = KeyPair::new_account().seed().unwrap();

        assert!(matches!(
            KeyMaterial::from_seeds("", &curve_seed),
            Err(ConfigError::Missing("NATS_AUTH_NKEY_ISSUER_SEED"))
        ));
        assert!(matches!(
            KeyMaterial::from_seeds(&account_seed, "  "),
            Err(ConfigError::Missing("NATS_AUTH_XKEY_ISSUER_SEED"))
        ));
    }

    #[test]
    fn garbage_seed_is_invalid() {
        let curve_seed = XKey::new().seed().unwrap();
        assert!(matches!(
            KeyMaterial::from_seeds("not-a-seed", &curve_seed),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn debug_shows_only_public_keys() {
        let account = KeyPair::new_account();
        let seed = account.seed().unwrap();
        let keys = KeyMaterial::new(account, XKey::new());
        let rendered = format!("{keys:?}");
        assert!(rendered.contains(&keys.issuer()));
        assert!(!rendered.contains(&seed));
    }
}
