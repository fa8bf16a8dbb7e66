//! Connection manager configuration.

use std::fmt;
use std::time::Duration;

use async_nats::{ConnectOptions, ServerAddr};

use crate::error::NatsError;
use crate::manifest::SubjectSubscription;
use crate::middleware::MiddlewarePipeline;

/// Server used when none is configured.
pub const DEFAULT_SERVER: &str = "nats://localhost:4222";

/// Fixed delay between connection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Upper bound for the first connection attempt made by `connect()`.
pub const DEFAULT_INITIAL_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default timeout for `request()`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Credentials presented to the broker.
///
/// Token and user/password authentication are mutually exclusive.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum NatsAuth {
    #[default]
    None,
    Token(String),
    UserPassword { user: String, password: String },
}

impl fmt::Debug for NatsAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Token(_) => f.write_str("Token(***)"),
            Self::UserPassword { user, .. } => write!(f, "UserPassword({user}, ***)"),
        }
    }
}

/// Everything the [`ConnectionManager`](crate::ConnectionManager) needs.
#[derive(Debug, Clone)]
pub struct NatsServiceConfig {
    pub servers: Vec<String>,
    /// Connect over WebSocket instead of the plain TCP protocol.
    pub websocket: bool,
    pub name: String,
    pub auth: NatsAuth,
    pub subscriptions: Vec<SubjectSubscription>,
    /// Applied to every subscription loop.
    pub middleware: MiddlewarePipeline,
    /// Applied to reply loops; falls back to `middleware` when empty.
    pub reply_middleware: MiddlewarePipeline,
    pub reconnect_delay: Duration,
    pub initial_connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for NatsServiceConfig {
    fn default() -> Self {
        Self {
            servers: vec![DEFAULT_SERVER.to_string()],
            websocket: false,
            name: "default".to_string(),
            auth: NatsAuth::None,
            subscriptions: Vec::new(),
            middleware: MiddlewarePipeline::new(),
            reply_middleware: MiddlewarePipeline::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            initial_connect_timeout: DEFAULT_INITIAL_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl NatsServiceConfig {
    #[must_use]
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn websocket(mut self, websocket: bool) -> Self {
        self.websocket = websocket;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: NatsAuth) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn subscriptions(mut self, subscriptions: Vec<SubjectSubscription>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewarePipeline) -> Self {
        self.middleware = middleware;
        self
    }

    #[must_use]
    pub fn reply_middleware(mut self, middleware: MiddlewarePipeline) -> Self {
        self.reply_middleware = middleware;
        self
    }

    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn initial_connect_timeout(mut self, timeout: Duration) -> Self {
        self.initial_connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The pipeline run by reply loops.
    pub(crate) fn reply_pipeline(&self) -> &MiddlewarePipeline {
        if self.reply_middleware.is_empty() {
            &self.middleware
        } else {
            &self.reply_middleware
        }
    }

    /// Parse the configured servers, applying the transport variant.
    ///
    /// Bare `host:port` entries get the scheme of the selected transport;
    /// entries with an explicit scheme are kept as-is.
    pub fn server_addrs(&self) -> Result<Vec<ServerAddr>, NatsError> {
        let scheme = if self.websocket { "ws" } else { "nats" };
        let addrs = self
            .servers
            .iter()
            .map(|server| {
                let url = if server.contains("://") {
                    server.clone()
                } else {
                    format!("{scheme}://{server}")
                };
                url.parse::<ServerAddr>()
                    .map_err(|e| NatsError::Config(format!("invalid server address {server}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if addrs.is_empty() {
            return Err(NatsError::Config("no NATS servers configured".into()));
        }
        Ok(addrs)
    }

    /// Base client options: name, credentials, request timeout and unbounded
    /// reconnects.
    pub(crate) fn connect_options(&self) -> ConnectOptions {
        let options = ConnectOptions::new()
            .name(&self.name)
            .max_reconnects(None::<usize>)
            .connection_timeout(self.initial_connect_timeout)
            .request_timeout(Some(self.request_timeout));

        match &self.auth {
            NatsAuth::None => options,
            NatsAuth::Token(token) => options.token(token.clone()),
            NatsAuth::UserPassword { user, password } => {
                options.user_and_password(user.clone(), password.clone())
            }
        }
    }
}
