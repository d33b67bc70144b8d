//! In-process STOMP broker for driving the client end to end.
//!
//! Accepts WebSocket upgrades on `/ws`, checks the bearer token in both the
//! upgrade request and the CONNECT frame, records everything the client does
//! as [`BrokerEvent`]s, and lets tests publish to subscribed destinations or
//! drop every connection.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use discussion_realtime::transport::{Frame, StompCommand};
use discussion_realtime::{ClientConfig, ConnectionState, DiscussionClient, DiscussionEvent, EventKind, ListenerHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const GENERAL_TOPIC: &str = "/topic/discussions";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn thread_topic(id: i64) -> String {
    format!("/topic/discussion/thread/{}", id)
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected { connection: usize },
    Rejected { connection: usize },
    Subscribed { connection: usize, destination: String, id: String },
    Unsubscribed { connection: usize, id: String },
    Published { destination: String, body: String },
    Disconnected { connection: usize },
}

#[derive(Debug, Clone)]
enum Outbound {
    Publish { destination: String, body: String },
    Kick,
}

#[derive(Clone)]
struct BrokerState {
    token: String,
    events: mpsc::UnboundedSender<BrokerEvent>,
    outbound: broadcast::Sender<Outbound>,
    connections: Arc<AtomicUsize>,
}

pub struct MockBroker {
    pub url: String,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    outbound: broadcast::Sender<Outbound>,
    connections: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl MockBroker {
    /// Start a broker that only accepts `Bearer <token>`.
    pub async fn start(token: &str) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let state = BrokerState {
            token: token.to_string(),
            events: events_tx,
            outbound: outbound.clone(),
            connections: connections.clone(),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock broker");
        let addr = listener.local_addr().expect("local addr");
        let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("ws://{}/ws", addr),
            events,
            outbound,
            connections,
            server,
        }
    }

    /// Client settings pointing at this broker, with fast retries and no heart-beats.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            broker_url: self.url.clone(),
            reconnect_base_delay: Duration::from_millis(20),
            heartbeat_outgoing: Duration::ZERO,
            heartbeat_incoming: Duration::ZERO,
            ..ClientConfig::default()
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn next_event(&mut self) -> BrokerEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for broker event")
            .expect("broker event channel closed")
    }

    /// Skip events until one matches.
    pub async fn wait_for<F>(&mut self, predicate: F) -> BrokerEvent
    where
        F: Fn(&BrokerEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if predicate(&event) {
                return event;
            }
        }
    }

    pub async fn wait_subscribed(&mut self, destination: &str) -> BrokerEvent {
        self.wait_for(|e| {
            matches!(e, BrokerEvent::Subscribed { destination: d, .. } if d == destination)
        })
        .await
    }

    /// Events already received, without waiting.
    pub fn drain(&mut self) -> Vec<BrokerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn publish(&self, destination: &str, body: impl Into<String>) {
        let _ = self.outbound.send(Outbound::Publish {
            destination: destination.to_string(),
            body: body.into(),
        });
    }

    /// Close every open connection from the broker side.
    pub fn kick(&self) {
        let _ = self.outbound.send(Outbound::Kick);
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn ws_handler(
    State(state): State<BrokerState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let upgrade_auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    ws.on_upgrade(move |socket| handle_socket(state, socket, upgrade_auth))
}

async fn next_frame(socket: &mut WebSocket) -> Option<Frame> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => match Frame::parse(&text) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => continue,
                Err(_) => return None,
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn handle_socket(state: BrokerState, mut socket: WebSocket, upgrade_auth: Option<String>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let mut outbound = state.outbound.subscribe();
    let expected = format!("Bearer {}", state.token);

    let Some(connect) = next_frame(&mut socket).await else {
        return;
    };
    let authorized = connect.command == StompCommand::Connect
        && connect.header("Authorization") == Some(expected.as_str())
        && upgrade_auth.as_deref() == Some(expected.as_str());
    if !authorized {
        let error = Frame::new(StompCommand::Error)
            .with_header("message", "invalid credentials")
            .with_body("bearer token rejected");
        let _ = socket.send(Message::Text(error.encode())).await;
        let _ = state.events.send(BrokerEvent::Rejected { connection });
        return;
    }

    let connected = Frame::new(StompCommand::Connected)
        .with_header("version", "1.2")
        .with_header("heart-beat", "0,0");
    if socket.send(Message::Text(connected.encode())).await.is_err() {
        return;
    }
    let _ = state.events.send(BrokerEvent::Connected { connection });

    // destination -> subscription id
    let mut subscriptions: HashMap<String, String> = HashMap::new();
    let mut message_id = 0u64;

    loop {
        tokio::select! {
            frame = next_frame(&mut socket) => {
                let Some(frame) = frame else { break };
                match frame.command {
                    StompCommand::Subscribe => {
                        let destination = frame.header("destination").unwrap_or_default().to_string();
                        let id = frame.header("id").unwrap_or_default().to_string();
                        subscriptions.insert(destination.clone(), id.clone());
                        let _ = state.events.send(BrokerEvent::Subscribed { connection, destination, id });
                    }
                    StompCommand::Unsubscribe => {
                        let id = frame.header("id").unwrap_or_default().to_string();
                        subscriptions.retain(|_, sub| *sub != id);
                        let _ = state.events.send(BrokerEvent::Unsubscribed { connection, id });
                    }
                    StompCommand::Send => {
                        let destination = frame.header("destination").unwrap_or_default().to_string();
                        let _ = state.events.send(BrokerEvent::Published { destination, body: frame.body });
                    }
                    StompCommand::Disconnect => {
                        let _ = state.events.send(BrokerEvent::Disconnected { connection });
                        break;
                    }
                    _ => {}
                }
            }
            out = outbound.recv() => match out {
                Ok(Outbound::Publish { destination, body }) => {
                    if let Some(id) = subscriptions.get(&destination) {
                        message_id += 1;
                        let message = Frame::new(StompCommand::Message)
                            .with_header("destination", destination.as_str())
                            .with_header("subscription", id.as_str())
                            .with_header("message-id", message_id.to_string())
                            .with_body(body);
                        if socket.send(Message::Text(message.encode())).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Outbound::Kick) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

pub async fn wait_for_state(client: &DiscussionClient, target: ConnectionState) {
    let mut states = client.state_changes();
    let reached = timeout(WAIT, states.wait_for(|s| *s == target)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "client never reached {target}; stats: {:?}",
        client.stats()
    );
}

/// Register a listener that forwards every matching event into a channel.
pub fn collect(
    client: &DiscussionClient,
    kind: EventKind,
) -> (ListenerHandle, mpsc::UnboundedReceiver<DiscussionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = client.on(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    (handle, rx)
}

pub async fn recv_event(events: &mut mpsc::UnboundedReceiver<DiscussionEvent>) -> DiscussionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Connect with `token` and wait until the general topic is live.
pub async fn connect_and_wait(client: &DiscussionClient, broker: &mut MockBroker, token: &str) {
    client.connect(token);
    broker.wait_subscribed(GENERAL_TOPIC).await;
    wait_for_state(client, ConnectionState::Connected).await;
}
