//! Connection status tracking.
//!
//! The broker client reports lifecycle changes through an event callback.
//! Those are normalised into [`StatusEvent`]s and consumed by a single
//! monitor task per connection. This module holds the pieces of that
//! monitor that do not need a live broker: the connection state cell and
//! the once-per-epoch registration gate.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use async_nats::Event;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Normalised status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Disconnect,
    Reconnecting { attempt: usize },
    Reconnect,
    Error(String),
    Close,
}

impl StatusEvent {
    /// Map a client event; returns `None` for events the monitor ignores.
    pub fn from_client_event(event: Event) -> Option<Self> {
        match event {
            Event::Connected => Some(Self::Reconnect),
            Event::Disconnected => Some(Self::Disconnect),
            Event::Closed => Some(Self::Close),
            Event::Draining => None,
            other => Some(Self::Error(other.to_string())),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnect => f.write_str("disconnect"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Reconnect => f.write_str("reconnect"),
            Self::Error(e) => write!(f, "error: {e}"),
            Self::Close => f.write_str("close"),
        }
    }
}

/// Shared [`ConnectionState`] with an atomic "start connecting" transition.
#[derive(Debug, Default)]
pub(crate) struct StateCell(Mutex<ConnectionState>);

impl StateCell {
    pub(crate) fn get(&self) -> ConnectionState {
        *self.lock()
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        *self.lock() = state;
    }

    /// Move to `Connecting` unless a connection is already being made or
    /// is alive. Returns whether the caller owns the attempt.
    pub(crate) fn try_begin_connect(&self) -> bool {
        let mut state = self.lock();
        match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Ensures the subscription manifest is registered at most once per
/// connection epoch.
///
/// The flag is set after a successful batch registration and only cleared
/// when the connection closes. Registration runs under the gate's lock, so
/// the initial registration and a concurrent `reconnect` event cannot both
/// register.
#[derive(Debug, Default)]
pub(crate) struct RegistrationGate {
    registered: tokio::sync::Mutex<bool>,
}

impl RegistrationGate {
    /// Run `register` unless this epoch is already registered.
    ///
    /// `register` reports whether the batch went through; only then is the
    /// epoch marked registered. Returns whether `register` was invoked.
    pub(crate) async fn register_once<F, Fut>(&self, register: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut registered = self.registered.lock().await;
        if *registered {
            return false;
        }
        if register().await {
            *registered = true;
        }
        true
    }

    /// Start a new epoch.
    pub(crate) async fn reset(&self) {
        *self.registered.lock().await = false;
    }

    pub(crate) async fn is_registered(&self) -> bool {
        *self.registered.lock().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn client_events_map_to_status() {
        assert_eq!(
            StatusEvent::from_client_event(Event::Connected),
            Some(StatusEvent::Reconnect)
        );
        assert_eq!(
            StatusEvent::from_client_event(Event::Disconnected),
            Some(StatusEvent::Disconnect)
        );
        assert_eq!(
            StatusEvent::from_client_event(Event::Closed),
            Some(StatusEvent::Close)
        );
        assert_eq!(StatusEvent::from_client_event(Event::Draining), None);
        assert!(matches!(
            StatusEvent::from_client_event(Event::SlowConsumer(7)),
            Some(StatusEvent::Error(_))
        ));
    }

    #[test]
    fn connect_is_claimed_once() {
        let cell = StateCell::default();
        assert!(cell.try_begin_connect());
        assert_eq!(cell.get(), ConnectionState::Connecting);
        assert!(!cell.try_begin_connect());

        cell.set(ConnectionState::Connected);
        assert!(!cell.try_begin_connect());

        cell.set(ConnectionState::Reconnecting);
        assert!(!cell.try_begin_connect());

        cell.set(ConnectionState::Disconnected);
        assert!(cell.try_begin_connect());
    }

    #[tokio::test]
    async fn registration_runs_once_per_epoch() {
        let gate = RegistrationGate::default();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let register = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        };

        // initial connect, then two reconnects in the same epoch
        assert!(gate.register_once(register).await);
        assert!(!gate.register_once(register).await);
        assert!(!gate.register_once(register).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // close starts a new epoch
        gate.reset().await;
        assert!(!gate.is_registered().await);
        assert!(gate.register_once(register).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(gate.is_registered().await);
    }

    #[tokio::test]
    async fn failed_batch_leaves_epoch_open() {
        let gate = RegistrationGate::default();
        assert!(gate.register_once(|| async { false }).await);
        assert!(!gate.is_registered().await);
        assert!(gate.register_once(|| async { true }).await);
        assert!(gate.is_registered().await);
    }

    #[tokio::test]
    async fn concurrent_registrations_do_not_duplicate() {
        let gate = Arc::new(RegistrationGate::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                gate.register_once(move || async move {
                    tokio::task::yield_now().await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    true
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
