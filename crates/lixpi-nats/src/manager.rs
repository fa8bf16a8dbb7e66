//! The connection manager.
//!
//! [`ConnectionManager`] owns the process's single broker connection. It is
//! constructed explicitly by the application's composition root and cloned
//! (cheaply) into whatever needs to publish, subscribe or answer requests.
//!
//! # Lifecycle
//!
//! * [`connect`](ConnectionManager::connect) never fails: the first attempt
//!   is bounded by the configured initial timeout and, on failure, a fixed
//!   delay retry is scheduled in the background.
//! * Once connected, a status monitor follows the connection's events and
//!   the configured subscription manifest is registered once per
//!   connection epoch. The epoch ends when the connection closes.
//! * [`drain`](ConnectionManager::drain) lets in-flight messages finish
//!   before closing; [`disconnect`](ConnectionManager::disconnect) stops
//!   everything immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_nats::{Client, Request, Subscriber};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NatsServiceConfig;
use crate::dispatch;
use crate::error::NatsError;
use crate::manifest::{MessageHandler, ReplyHandler, SubjectHandler, SubscriptionKind};
use crate::payload::PayloadType;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::status::{ConnectionState, RegistrationGate, StateCell, StatusEvent};

/// Per-subscription options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Queue group; members of the same group share the subject's load.
    pub queue: Option<String>,
}

impl SubscriptionOptions {
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
        }
    }
}

/// Handle to the managed broker connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: NatsServiceConfig,
    client: RwLock<Option<Client>>,
    state: StateCell,
    registration: RegistrationGate,
    registry: SubscriptionRegistry,
    monitor: Mutex<Option<JoinHandle<()>>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager. No connection is made until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: NatsServiceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client: RwLock::new(None),
                state: StateCell::default(),
                registration: RegistrationGate::default(),
                registry: SubscriptionRegistry::new(),
                monitor: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
            }),
        }
    }

    /// Create a manager and make the first connection attempt.
    pub async fn init(config: NatsServiceConfig) -> Self {
        let manager = Self::new(config);
        manager.connect().await;
        manager
    }

    pub fn config(&self) -> &NatsServiceConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Connect to the broker.
    ///
    /// Does nothing if a connection is already being made or is alive.
    /// Connection failures are logged and retried after the configured
    /// reconnect delay; they are never returned to the caller.
    pub async fn connect(&self) {
        if !self.inner.state.try_begin_connect() {
            debug!(state = ?self.state(), "connect skipped, connection already in progress");
            return;
        }

        let timeout = self.inner.config.initial_connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.establish()).await;

        match attempt {
            Ok(Ok((client, events))) => {
                let servers = self.inner.config.servers.join(",");
                let transport = if self.inner.config.websocket { "ws" } else { "nats" };
                *self.write_client() = Some(client);
                self.inner.state.set(ConnectionState::Connected);
                info!(%servers, %transport, name = %self.inner.config.name, "NATS -> listening");

                self.monitor_status(events);
                self.init_subscriptions().await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "NATS -> connection error");
                self.inner.state.set(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
            Err(_) => {
                error!(timeout_ms = timeout.as_millis(), "NATS -> initial connect timeout");
                self.inner.state.set(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    /// Open the client, wiring its events into a status channel.
    async fn establish(&self) -> Result<(Client, mpsc::UnboundedReceiver<StatusEvent>), NatsError> {
        let addrs = self.inner.config.server_addrs()?;
        let delay = self.inner.config.reconnect_delay;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reconnecting_tx = events_tx.clone();

        let options = self
            .inner
            .config
            .connect_options()
            .event_callback(move |event| {
                let events_tx = events_tx.clone();
                async move {
                    if let Some(status) = StatusEvent::from_client_event(event) {
                        let _ = events_tx.send(status);
                    }
                }
            })
            .reconnect_delay_callback(move |attempt| {
                if attempt <= 1 {
                    Duration::ZERO
                } else {
                    let _ = reconnecting_tx.send(StatusEvent::Reconnecting { attempt });
                    delay
                }
            });

        let client = options.connect(addrs).await?;
        Ok((client, events_rx))
    }

    fn schedule_reconnect(&self) {
        let delay = self.inner.config.reconnect_delay;
        let weak = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Box::pin(ConnectionManager { inner }.connect()).await;
            }
        });

        if let Some(previous) = lock(&self.inner.reconnect_timer).replace(timer) {
            previous.abort();
        }
        debug!(delay_ms = delay.as_millis(), "NATS -> reconnect scheduled");
    }

    fn cancel_reconnect(&self) {
        if let Some(timer) = lock(&self.inner.reconnect_timer).take() {
            timer.abort();
        }
    }

    /// Whether a background retry is waiting to run.
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.reconnect_timer)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    // ------------------------------------------------------------------
    // Status monitor
    // ------------------------------------------------------------------

    /// Start following the current connection's status events.
    ///
    /// Exactly one monitor runs per connection; a monitor left over from a
    /// previous connection is stopped.
    fn monitor_status(&self, events: mpsc::UnboundedReceiver<StatusEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(run_monitor(weak, events));
        if let Some(previous) = lock(&self.inner.monitor).replace(task) {
            previous.abort();
        }
    }

    async fn handle_status(&self, event: StatusEvent) {
        match event {
            StatusEvent::Disconnect => {
                error!("NATS -> disconnected");
                self.inner.state.set(ConnectionState::Reconnecting);
            }
            StatusEvent::Reconnecting { attempt } => {
                warn!(attempt, "NATS -> reconnecting");
                self.inner.state.set(ConnectionState::Reconnecting);
            }
            StatusEvent::Reconnect => {
                info!("NATS -> reconnected");
                if self.is_connected() {
                    self.inner.state.set(ConnectionState::Connected);
                    self.init_subscriptions().await;
                }
            }
            StatusEvent::Error(e) => {
                error!(error = %e, "NATS -> connection error");
            }
            StatusEvent::Close => {
                warn!("NATS -> connection closed");
                self.write_client().take();
                let stale = self.inner.registry.abort_all();
                debug!(stale, "NATS -> dropped subscriptions of closed connection");
                self.inner.state.set(ConnectionState::Disconnected);
                self.inner.registration.reset().await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Declarative subscriptions
    // ------------------------------------------------------------------

    /// Register the configured manifest unless this epoch already did.
    async fn init_subscriptions(&self) {
        self.inner
            .registration
            .register_once(|| self.register_manifest())
            .await;
    }

    async fn register_manifest(&self) -> bool {
        if !self.is_connected() {
            return false;
        }

        for entry in &self.inner.config.subscriptions {
            let options = SubscriptionOptions {
                queue: entry.queue.clone(),
            };
            let handle = match &entry.handler {
                SubjectHandler::Subscribe(handler) => {
                    self.subscribe(&entry.subject, handler.clone(), options, entry.payload_type)
                        .await
                }
                SubjectHandler::Reply(handler) => {
                    self.reply(&entry.subject, handler.clone(), options, entry.payload_type)
                        .await
                }
            };

            match handle {
                Some(handle) => info!(
                    kind = %handle.kind,
                    subject = %handle.subject,
                    queue = handle.queue.as_deref().unwrap_or(""),
                    "NATS -> register"
                ),
                None => error!(subject = %entry.subject, "failed to subscribe to NATS subject"),
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Serialize `data` as JSON and publish it.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        data: &T,
    ) -> Result<(), NatsError> {
        let payload = serde_json::to_vec(data)?;
        self.publish_bytes(subject, Bytes::from(payload)).await
    }

    /// Publish a raw payload.
    pub async fn publish_bytes(&self, subject: &str, payload: Bytes) -> Result<(), NatsError> {
        let Some(client) = self.client() else {
            error!(%subject, "NATS client is not connected");
            return Err(NatsError::NotConnected);
        };
        client.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    /// Subscribe `handler` to `subject`.
    ///
    /// Spawns a dedicated loop that decodes each message per
    /// `payload_type`, runs the middleware chain and then the handler.
    /// Returns `None` (logged) when not connected or the broker refuses the
    /// subscription.
    pub async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
        options: SubscriptionOptions,
        payload_type: PayloadType,
    ) -> Option<SubscriptionHandle> {
        let client = self.connected_client(subject)?;
        let subscriber = open_subscriber(&client, subject, &options).await?;

        let handle = self.new_handle(subject, options, SubscriptionKind::Subscribe, payload_type);
        let task = tokio::spawn(dispatch::run_subscription(
            subject.to_string(),
            subscriber,
            payload_type,
            self.inner.config.middleware.clone(),
            handler,
        ));
        self.inner.registry.insert(handle.clone(), task);
        Some(handle)
    }

    /// Answer requests on `subject` with `handler`.
    ///
    /// Same consumption model as [`subscribe`](Self::subscribe); the
    /// handler's result, or an error reply, is always sent back to the
    /// request's reply subject.
    pub async fn reply(
        &self,
        subject: &str,
        handler: ReplyHandler,
        options: SubscriptionOptions,
        payload_type: PayloadType,
    ) -> Option<SubscriptionHandle> {
        let client = self.connected_client(subject)?;
        let subscriber = open_subscriber(&client, subject, &options).await?;

        let handle = self.new_handle(subject, options, SubscriptionKind::Reply, payload_type);
        let task = tokio::spawn(dispatch::run_reply(
            subject.to_string(),
            client,
            subscriber,
            payload_type,
            self.inner.config.reply_pipeline().clone(),
            handler,
        ));
        self.inner.registry.insert(handle.clone(), task);
        Some(handle)
    }

    /// Send a JSON request and wait for a single JSON reply.
    ///
    /// Returns `Ok(None)` (logged) when not connected. Waits at most
    /// `timeout`, or the configured default request timeout, and fails with
    /// [`NatsError::Timeout`] once that passes. A broker that knows nobody
    /// is subscribed answers at once with [`NatsError::NoResponders`].
    pub async fn request<T, R>(
        &self,
        subject: &str,
        data: &T,
        timeout: Option<Duration>,
    ) -> Result<Option<R>, NatsError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let Some(client) = self.client() else {
            error!(%subject, "NATS client is not connected");
            return Ok(None);
        };

        let payload = Bytes::from(serde_json::to_vec(data)?);
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        let request = Request::new().payload(payload).timeout(Some(timeout));
        let response = client
            .send_request(subject.to_string(), request)
            .await
            .map_err(|e| NatsError::from_request(subject, timeout, &e))?;

        Ok(Some(serde_json::from_slice(&response.payload)?))
    }

    // ------------------------------------------------------------------
    // Subscription bookkeeping
    // ------------------------------------------------------------------

    /// Live subscriptions whose subject matches any of `filters` (all of
    /// them when `filters` is empty). See
    /// [`SubscriptionRegistry::get_subscriptions`] for the filter syntax.
    pub fn get_subscriptions<S: AsRef<str>>(
        &self,
        filters: &[S],
    ) -> HashMap<String, SubscriptionHandle> {
        if !self.is_connected() {
            return HashMap::new();
        }
        self.inner.registry.get_subscriptions(filters)
    }

    /// Stop a single subscription.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.registry.remove(handle.id)
    }

    /// Stop every subscription immediately.
    pub fn unsubscribe_all(&self) {
        if !self.is_connected() {
            return;
        }
        let count = self.inner.registry.abort_all();
        info!(count, "All NATS subscriptions cancelled");
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Close the connection immediately.
    pub async fn disconnect(&self) {
        self.cancel_reconnect();
        let Some(client) = self.write_client().take() else {
            return;
        };

        self.inner.registry.abort_all();
        if let Some(monitor) = lock(&self.inner.monitor).take() {
            monitor.abort();
        }
        self.inner.registration.reset().await;
        self.inner.state.set(ConnectionState::Disconnected);
        drop(client);
        info!("NATS disconnected gracefully.");
    }

    /// Let in-flight messages finish, then close the connection.
    pub async fn drain(&self) -> Result<(), NatsError> {
        self.cancel_reconnect();
        let Some(client) = self.client() else {
            return Ok(());
        };

        // Out of the registry first, so the close event that follows the
        // drain cannot abort loops that are still finishing.
        let tasks = self.inner.registry.take_tasks();
        client
            .drain()
            .await
            .map_err(|e| NatsError::Nats(e.to_string()))?;

        for (handle, task) in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(subject = %handle.subject, error = %e, "subscription loop failed during drain");
                }
            }
        }

        self.write_client().take();
        self.inner.registration.reset().await;
        self.inner.state.set(ConnectionState::Disconnected);
        info!("NATS drained all subscriptions and disconnected.");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Whether a connection object exists and has not been closed.
    pub fn is_connected(&self) -> bool {
        self.read_client().is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// The raw client, for features this manager does not wrap.
    pub fn client(&self) -> Option<Client> {
        self.read_client().clone()
    }

    fn connected_client(&self, subject: &str) -> Option<Client> {
        let client = self.client();
        if client.is_none() {
            error!(%subject, "NATS client is not connected");
        }
        client
    }

    fn new_handle(
        &self,
        subject: &str,
        options: SubscriptionOptions,
        kind: SubscriptionKind,
        payload_type: PayloadType,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            id: self.inner.registry.next_id(),
            subject: subject.to_string(),
            queue: options.queue,
            kind,
            payload_type,
        }
    }

    fn read_client(&self) -> std::sync::RwLockReadGuard<'_, Option<Client>> {
        self.inner
            .client
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_client(&self) -> std::sync::RwLockWriteGuard<'_, Option<Client>> {
        self.inner
            .client
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

async fn run_monitor(weak: Weak<Inner>, mut events: mpsc::UnboundedReceiver<StatusEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        ConnectionManager { inner }.handle_status(event).await;
    }
    debug!("NATS -> status monitor stopped");
}

async fn open_subscriber(
    client: &Client,
    subject: &str,
    options: &SubscriptionOptions,
) -> Option<Subscriber> {
    let result = match &options.queue {
        Some(queue) => {
            client
                .queue_subscribe(subject.to_string(), queue.clone())
                .await
        }
        None => client.subscribe(subject.to_string()).await,
    };

    match result {
        Ok(subscriber) => Some(subscriber),
        Err(e) => {
            error!(%subject, error = %e, "failed to subscribe");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
