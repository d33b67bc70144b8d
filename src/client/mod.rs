//! The discussion client: one broker connection per instance, topic
//! subscriptions, and fan-out of decoded events to local listeners.
//!
//! Every operation is synchronous and non-blocking. The socket lives on a
//! background session task; outcomes are observed through
//! [`DiscussionClient::is_connected`], [`DiscussionClient::stats`] or the
//! [`DiscussionClient::state_changes`] watch channel.
//!
//! ```rust,no_run
//! use discussion_realtime::{ClientConfig, DiscussionClient, EventKind};
//!
//! # async fn example() {
//! let client = DiscussionClient::new(ClientConfig::default());
//! let handle = client.on(EventKind::ReplyCreated, |event| {
//!     println!("new reply in thread {:?}", event.thread_id());
//! });
//! client.connect("token");
//! // ... later
//! handle.unsubscribe();
//! client.disconnect();
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::models::event::{DiscussionEvent, EventKind};
use crate::models::state::{ClientStats, ConnectionState};
use crate::models::topic::TopicKey;
use crate::services::{ListenerHandle, ListenerRegistry, ReconnectPolicy, SubscriptionTable};
use crate::transport::session::{Session, SessionCommand};

/// State shared between the client handles and the session task.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) listeners: Arc<ListenerRegistry>,
    /// Thread subscriptions. The general topic is implied by `Connected`.
    pub(crate) subscriptions: SubscriptionTable,
    state: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU32,
    /// Bumped whenever a session is started or retired; stale sessions stop writing state.
    epoch: AtomicU64,
    commands: Mutex<Option<mpsc::UnboundedSender<SessionCommand>>>,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
    fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            policy: ReconnectPolicy::from_config(&config),
            config,
            listeners: Arc::new(ListenerRegistry::new()),
            subscriptions: SubscriptionTable::new(),
            state,
            reconnect_attempts: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            commands: Mutex::new(None),
            last_connected_at: Mutex::new(None),
        }
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Move to `next` (and optionally set the attempt counter) if `epoch` is still
    /// the live session. Returns whether it was.
    pub(crate) fn transition(
        &self,
        epoch: u64,
        next: ConnectionState,
        attempts: Option<u32>,
    ) -> bool {
        let mut current = false;
        self.state.send_if_modified(|state| {
            if !self.is_current(epoch) {
                return false;
            }
            current = true;
            if let Some(n) = attempts {
                self.reconnect_attempts.store(n, Ordering::SeqCst);
            }
            if *state == next {
                return false;
            }
            info!(from = %state, to = %next, "connection state changed");
            *state = next;
            true
        });
        current
    }

    pub(crate) fn mark_connected(&self, epoch: u64) -> bool {
        if !self.transition(epoch, ConnectionState::Connected, Some(0)) {
            return false;
        }
        *self
            .last_connected_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        true
    }

    fn command(&self, command: SessionCommand) {
        let commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        match commands.as_ref() {
            Some(tx) if tx.send(command).is_ok() => {}
            _ => debug!("no live session; command dropped"),
        }
    }
}

/// Caller-owned handle to one logical broker connection. Clones share the connection.
///
/// Call [`disconnect`](Self::disconnect) when the session ends; the background
/// task keeps running until then.
#[derive(Clone)]
pub struct DiscussionClient {
    shared: Arc<Shared>,
}

impl DiscussionClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Open the broker connection with `token` as bearer credential.
    ///
    /// No-op while connected or connecting. Otherwise any previous session is
    /// retired, the reconnect counter resets, and a new session starts. Must be
    /// called from within a tokio runtime; outside one the call is logged and ignored.
    pub fn connect(&self, token: impl Into<String>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("connect called outside a tokio runtime; ignoring");
                return;
            }
        };

        let shared = &self.shared;
        let mut started = None;
        shared.state.send_if_modified(|state| {
            if matches!(*state, ConnectionState::Connected | ConnectionState::Connecting) {
                return false;
            }
            let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            shared.reconnect_attempts.store(0, Ordering::SeqCst);
            info!(from = %state, to = %ConnectionState::Connecting, "connection state changed");
            *state = ConnectionState::Connecting;
            started = Some(epoch);
            true
        });
        let Some(epoch) = started else {
            debug!("connect ignored: already connected or connecting");
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let previous = shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if let Some(previous) = previous {
            let _ = previous.send(SessionCommand::Disconnect);
        }

        info!(url = %shared.config.broker_url, "connecting to broker");
        let session = Session::new(shared.clone(), epoch, token.into(), rx);
        runtime.spawn(session.run());
    }

    /// Unsubscribe everything, close the connection, drop all listeners and
    /// reset the reconnect counter. Safe to call when not connected.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let mut dropped = Vec::new();
        shared.state.send_if_modified(|state| {
            shared.epoch.fetch_add(1, Ordering::SeqCst);
            shared.reconnect_attempts.store(0, Ordering::SeqCst);
            dropped = shared.subscriptions.drain();
            if *state == ConnectionState::Disconnected {
                return false;
            }
            info!(from = %state, to = %ConnectionState::Disconnected, "connection state changed");
            *state = ConnectionState::Disconnected;
            true
        });

        let session = shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            let _ = session.send(SessionCommand::Disconnect);
        }

        let listeners = shared.listeners.len();
        shared.listeners.clear();
        info!(
            subscriptions = dropped.len(),
            listeners, "disconnected and cleared local state"
        );
    }

    /// Follow one thread's topic. No-op if not connected or already following it.
    pub fn subscribe_to_thread(&self, thread_id: i64) {
        let key = TopicKey::Thread(thread_id);
        // Holding the state borrow keeps `disconnect` from interleaving with the insert.
        let state = self.shared.state.borrow();
        if *state != ConnectionState::Connected {
            debug!(topic = %key, state = %*state, "not connected; subscribe ignored");
            return;
        }
        let destination = key.destination(&self.shared.config);
        match self.shared.subscriptions.insert_if_absent(key, destination) {
            Some(handle) => {
                debug!(topic = %key, destination = %handle.destination, "subscribing");
                self.shared.command(SessionCommand::Subscribe(handle));
            }
            None => debug!(topic = %key, "already subscribed"),
        }
    }

    /// Stop following a thread. No-op if not subscribed.
    pub fn unsubscribe_from_thread(&self, thread_id: i64) {
        let key = TopicKey::Thread(thread_id);
        match self.shared.subscriptions.remove(key) {
            Some(handle) => {
                debug!(topic = %key, "unsubscribing");
                self.shared.command(SessionCommand::Unsubscribe(handle));
            }
            None => debug!(topic = %key, "not subscribed; unsubscribe ignored"),
        }
    }

    /// Register `callback` for every future event of `kind`, from any topic.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(&DiscussionEvent) + Send + Sync + 'static,
    {
        let id = self.shared.listeners.register(kind, Arc::new(callback));
        ListenerHandle::new(kind, id, &self.shared.listeners)
    }

    /// Publish `payload` as JSON to `destination`. Dropped with a warning when not connected.
    pub fn send<T>(&self, destination: &str, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        if !self.is_connected() {
            warn!(destination = %destination, "not connected; dropping outbound message");
            return;
        }
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(destination = %destination, error = %e, "could not serialize outbound message");
                return;
            }
        };
        self.shared.command(SessionCommand::Send {
            destination: destination.to_string(),
            body,
        });
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.state.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every connection-state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> ClientStats {
        let state = self.state();
        let connected = state == ConnectionState::Connected;
        ClientStats {
            connected,
            state,
            reconnect_attempts: self.shared.reconnect_attempts(),
            max_reconnect_attempts: self.shared.policy.max_attempts,
            active_subscriptions: self.shared.subscriptions.len() + usize::from(connected),
            active_listeners: self.shared.listeners.len(),
            last_connected_at: *self
                .shared
                .last_connected_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl std::fmt::Debug for DiscussionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscussionClient")
            .field("broker_url", &self.shared.config.broker_url)
            .field("state", &self.state())
            .finish()
    }
}
