//! Service configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use lixpi_nats::{NatsAuth, NatsServiceConfig, SubjectPermissions};

use crate::error::ConfigError;
use crate::permissions::{PermissionEntry, templates_from_entries};

/// A secret value that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone)]
pub struct CalloutConfig {
    pub servers: Vec<String>,
    pub websocket: bool,
    pub client_name: String,
    pub nats_auth: NatsAuth,
    pub nkey_seed: Secret,
    pub xkey_seed: Secret,
    /// Account issued users are placed in.
    pub auth_account: String,
    pub jwks_uri: String,
    pub audience: String,
    pub issuer: String,
    pub algorithms: Vec<Algorithm>,
    pub permissions_file: Option<PathBuf>,
    pub credential_ttl: Option<Duration>,
}

impl CalloutConfig {
    /// Build the configuration from environment variables.
    ///
    /// | Variable                     | Default                 | Description                               |
    /// |------------------------------|-------------------------|-------------------------------------------|
    /// | `NATS_SERVERS`               | `nats://localhost:4222` | Comma-separated server list               |
    /// | `NATS_WEBSOCKET`             | `false`                 | Use the WebSocket transport               |
    /// | `NATS_CLIENT_NAME`           | `lixpi-auth-callout`    | Client connection name                    |
    /// | `NATS_TOKEN`                 | -                       | Token auth (excludes user/password)       |
    /// | `NATS_USER` / `NATS_PASSWORD`| -                       | User/password auth                        |
    /// | `NATS_AUTH_NKEY_ISSUER_SEED` | required                | Account seed signing issued JWTs          |
    /// | `NATS_AUTH_XKEY_ISSUER_SEED` | required                | Curve seed opening auth requests          |
    /// | `NATS_AUTH_ACCOUNT`          | required                | Account issued users are placed in        |
    /// | `OIDC_JWKS_URI`              | required                | Key-set endpoint of the identity provider |
    /// | `OIDC_AUDIENCE`              | required                | Expected token audience                   |
    /// | `OIDC_ISSUER`                | required                | Expected token issuer                     |
    /// | `OIDC_ALGORITHMS`            | `RS256`                 | Comma-separated allowed algorithms        |
    /// | `NATS_PERMISSIONS_FILE`      | -                       | JSON permission manifest                  |
    /// | `AUTH_CREDENTIAL_TTL_SECS`   | -                       | Lifetime of issued user credentials       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let servers = var("NATS_SERVERS").map_or_else(
            || vec![lixpi_nats::config::DEFAULT_SERVER.to_string()],
            |list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            },
        );

        let websocket = match var("NATS_WEBSOCKET").as_deref() {
            None | Some("false" | "0") => false,
            Some("true" | "1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "NATS_WEBSOCKET",
                    reason: format!("expected true or false, got {other}"),
                });
            }
        };

        let nats_auth = match (var("NATS_TOKEN"), var("NATS_USER")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid {
                    name: "NATS_TOKEN",
                    reason: "token and user/password auth are mutually exclusive".into(),
                });
            }
            (Some(token), None) => NatsAuth::Token(token),
            (None, Some(user)) => NatsAuth::UserPassword {
                user,
                password: required("NATS_PASSWORD")?,
            },
            (None, None) => NatsAuth::None,
        };

        let algorithms = var("OIDC_ALGORITHMS")
            .unwrap_or_else(|| "RS256".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|alg| {
                Algorithm::from_str(alg).map_err(|e| ConfigError::Invalid {
                    name: "OIDC_ALGORITHMS",
                    reason: format!("{alg}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let credential_ttl = var("AUTH_CREDENTIAL_TTL_SECS")
            .map(|secs| {
                secs.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| ConfigError::Invalid {
                        name: "AUTH_CREDENTIAL_TTL_SECS",
                        reason: e.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            servers,
            websocket,
            client_name: var("NATS_CLIENT_NAME").unwrap_or_else(|| "lixpi-auth-callout".into()),
            nats_auth,
            nkey_seed: Secret(required("NATS_AUTH_NKEY_ISSUER_SEED")?),
            xkey_seed: Secret(required("NATS_AUTH_XKEY_ISSUER_SEED")?),
            auth_account: required("NATS_AUTH_ACCOUNT")?,
            jwks_uri: required("OIDC_JWKS_URI")?,
            audience: required("OIDC_AUDIENCE")?,
            issuer: required("OIDC_ISSUER")?,
            algorithms,
            permissions_file: var("NATS_PERMISSIONS_FILE").map(PathBuf::from),
            credential_ttl,
        })
    }

    /// Connection settings for the callout's own broker connection.
    pub fn nats_config(&self) -> NatsServiceConfig {
        NatsServiceConfig::default()
            .servers(self.servers.clone())
            .websocket(self.websocket)
            .name(self.client_name.clone())
            .auth(self.nats_auth.clone())
    }

    /// Load the permission templates, if a manifest file is configured.
    pub fn load_permissions(&self) -> Result<Vec<SubjectPermissions>, ConfigError> {
        let Some(path) = &self.permissions_file else {
            return Ok(Vec::new());
        };
        let error = |reason: String| ConfigError::Permissions {
            path: path.display().to_string(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| error(e.to_string()))?;
        let entries: Vec<PermissionEntry> =
            serde_json::from_str(&raw).map_err(|e| error(e.to_string()))?;
        Ok(templates_from_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("NATS_AUTH_NKEY_ISSUER_SEED", "SAAN-seed"),
        ("NATS_AUTH_XKEY_ISSUER_SEED", "SXAN-seed"),
        ("NATS_AUTH_ACCOUNT", "LIXPI"),
        ("OIDC_JWKS_URI", "https://auth.example.com/.well-known/jwks.json"),
        ("OIDC_AUDIENCE", "https://api.example.com"),
        ("OIDC_ISSUER", "https://auth.example.com/"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        REQUIRED.iter().chain(extra).copied().collect()
    }

    #[test]
    fn defaults() {
        let cfg = CalloutConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(cfg.servers, vec!["nats://localhost:4222"]);
        assert!(!cfg.websocket);
        assert_eq!(cfg.client_name, "lixpi-auth-callout");
        assert_eq!(cfg.nats_auth, NatsAuth::None);
        assert_eq!(cfg.algorithms, vec![Algorithm::RS256]);
        assert!(cfg.permissions_file.is_none());
        assert!(cfg.credential_ttl.is_none());
        assert_eq!(cfg.auth_account, "LIXPI");
    }

    #[test]
    fn missing_seed_is_fatal() {
        let vars: Vec<_> = REQUIRED
            .iter()
            .filter(|(k, _)| *k != "NATS_AUTH_XKEY_ISSUER_SEED")
            .copied()
            .collect();
        assert!(matches!(
            CalloutConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Missing("NATS_AUTH_XKEY_ISSUER_SEED"))
        ));
    }

    #[test]
    fn overrides() {
        let cfg = CalloutConfig::from_lookup(lookup(&with(&[
            ("NATS_SERVERS", "nats-1:4222, nats-2:4222"),
            ("NATS_WEBSOCKET", "true"),
            ("NATS_TOKEN", "t0ken"),
            ("OIDC_ALGORITHMS", "RS256,ES256"),
            ("AUTH_CREDENTIAL_TTL_SECS", "3600"),
            ("NATS_PERMISSIONS_FILE", "/etc/lixpi/permissions.json"),
        ])))
        .unwrap();

        assert_eq!(cfg.servers, vec!["nats-1:4222", "nats-2:4222"]);
        assert!(cfg.websocket);
        assert_eq!(cfg.nats_auth, NatsAuth::Token("t0ken".into()));
        assert_eq!(cfg.algorithms, vec![Algorithm::RS256, Algorithm::ES256]);
        assert_eq!(cfg.credential_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(
            cfg.permissions_file,
            Some(PathBuf::from("/etc/lixpi/permissions.json"))
        );

        let nats = cfg.nats_config();
        assert!(nats.websocket);
        assert_eq!(nats.servers.len(), 2);
    }

    #[test]
    fn token_and_user_are_exclusive() {
        let result = CalloutConfig::from_lookup(lookup(&with(&[
            ("NATS_TOKEN", "t0ken"),
            ("NATS_USER", "svc"),
            ("NATS_PASSWORD", "pw"),
        ])));
        assert!(matches!(result, Err(ConfigError::Invalid { name: "NATS_TOKEN", .. })));

        let result = CalloutConfig::from_lookup(lookup(&with(&[("NATS_USER", "svc")])));
        assert!(matches!(result, Err(ConfigError::Missing("NATS_PASSWORD"))));
    }

    #[test]
    fn bad_values_are_rejected() {
        for extra in [
            ("NATS_WEBSOCKET", "maybe"),
            ("OIDC_ALGORITHMS", "RS999"),
            ("AUTH_CREDENTIAL_TTL_SECS", "soon"),
        ] {
            let result = CalloutConfig::from_lookup(lookup(&with(&[extra])));
            assert!(matches!(result, Err(ConfigError::Invalid { .. })), "{extra:?}");
        }
    }

    #[test]
    fn seeds_are_redacted() {
        let cfg = CalloutConfig::from_lookup(lookup(REQUIRED)).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("SAAN-seed"));
        assert!(!rendered.contains("SXAN-seed"));
        assert_eq!(cfg.nkey_seed.expose(), "SAAN-seed");
    }

    #[test]
    fn permissions_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("lixpi-perms-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{ "subject": "orders", "permissions": { "sub": { "allow": ["orders.{userId}.>"] } } }]"#,
        )
        .unwrap();

        let mut cfg = CalloutConfig::from_lookup(lookup(REQUIRED)).unwrap();
        cfg.permissions_file = Some(path.clone());
        let templates = cfg.load_permissions().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(templates.len(), 1);
        assert_eq!(
            templates[0].subscribe.as_ref().unwrap().allow,
            vec!["orders.{userId}.>"]
        );

        cfg.permissions_file = Some(PathBuf::from("/nonexistent/lixpi/perms.json"));
        assert!(matches!(
            cfg.load_permissions(),
            Err(ConfigError::Permissions { .. })
        ));
    }
}
