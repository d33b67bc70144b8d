//! Session task: owns the WebSocket, speaks STOMP, dispatches inbound events,
//! and applies the reconnect policy when the transport fails.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::Shared;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::models::state::ConnectionState;
use crate::models::topic::TopicKey;
use crate::services::SubscriptionHandle;
use crate::transport::frame::{Frame, Heartbeat, StompCommand};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Stand-in period for a disabled heart-beat timer.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Requests from the client handles to the session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Subscribe(SubscriptionHandle),
    Unsubscribe(SubscriptionHandle),
    Send { destination: String, body: String },
    /// Unsubscribe everything live on this connection, send DISCONNECT, close the socket, exit.
    Disconnect,
}

pub(crate) struct Session {
    shared: Arc<Shared>,
    epoch: u64,
    token: String,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl Session {
    pub(crate) fn new(
        shared: Arc<Shared>,
        epoch: u64,
        token: String,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        Self {
            shared,
            epoch,
            token,
            commands,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if !self
                .shared
                .transition(self.epoch, ConnectionState::Connecting, None)
            {
                return;
            }

            let handshake = handshake(&self.shared.config, &self.token);
            let failure = match until(&mut self.commands, handshake).await {
                None => return,
                Some(Ok((ws, heartbeat))) => match self.serve(ws, heartbeat).await {
                    Ok(()) => return,
                    Err(e) => e,
                },
                Some(Err(e)) => e,
            };
            if !self.shared.is_current(self.epoch) {
                return;
            }
            warn!(error = %failure, "broker connection failed");

            let attempts = self.shared.reconnect_attempts();
            let Some(delay) = self.shared.policy.next_delay(attempts) else {
                warn!(
                    attempts,
                    "reconnect budget exhausted; waiting for an explicit connect"
                );
                self.shared
                    .transition(self.epoch, ConnectionState::Exhausted, None);
                return;
            };
            let attempt = attempts + 1;
            if !self
                .shared
                .transition(self.epoch, ConnectionState::Disconnected, Some(attempt))
            {
                return;
            }
            info!(
                attempt,
                max = self.shared.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            if until(&mut self.commands, tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return;
            }
        }
    }

    /// Drive an established connection until it fails (`Err`) or a disconnect is requested (`Ok`).
    async fn serve(&mut self, ws: WsStream, heartbeat: Heartbeat) -> ClientResult<()> {
        let (mut sink, mut stream) = ws.split();
        let config = &self.shared.config;

        let general = SubscriptionHandle {
            key: TopicKey::General,
            id: format!("sub-{}", Uuid::new_v4().as_simple()),
            destination: TopicKey::General.destination(config),
        };
        let mut live = LiveSubscriptions::default();
        sink.send(subscribe_frame(&general)).await?;
        live.insert(&general.id);

        let remembered = self.shared.subscriptions.snapshot();
        for handle in &remembered {
            sink.send(subscribe_frame(handle)).await?;
            live.insert(&handle.id);
        }

        if !self.shared.mark_connected(self.epoch) {
            close_gracefully(&mut sink, &live.ids()).await;
            return Ok(());
        }
        info!(
            general = %general.destination,
            resubscribed = remembered.len(),
            "connected to broker"
        );

        let outgoing = heartbeat.outgoing.unwrap_or(FAR_FUTURE);
        let mut beat = interval_at(Instant::now() + outgoing, outgoing);
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let silence_limit = heartbeat.incoming.map(|d| d * 2);
        let incoming = heartbeat.incoming.unwrap_or(FAR_FUTURE);
        let mut watchdog = interval_at(Instant::now() + incoming, incoming);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Disconnect) | None => {
                        close_gracefully(&mut sink, &live.ids()).await;
                        return Ok(());
                    }
                    Some(SessionCommand::Subscribe(handle)) => {
                        if live.insert(&handle.id) {
                            sink.send(subscribe_frame(&handle)).await?;
                            debug!(topic = %handle.key, destination = %handle.destination, "subscribed");
                        }
                    }
                    Some(SessionCommand::Unsubscribe(handle)) => {
                        if live.remove(&handle.id) {
                            sink.send(unsubscribe_frame(&handle.id)).await?;
                            debug!(topic = %handle.key, "unsubscribed");
                        }
                    }
                    Some(SessionCommand::Send { destination, body }) => {
                        sink.send(send_frame(&destination, body)).await?;
                        debug!(destination = %destination, "published");
                    }
                },

                msg = stream.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => self.on_text(&text)?,
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => self.on_text(&text)?,
                            Err(_) => warn!("dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            return Err(ClientError::Closed(close_reason(frame)));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ClientError::Closed("stream ended".to_string())),
                    }
                }

                _ = beat.tick(), if heartbeat.outgoing.is_some() => {
                    sink.send(Message::Text("\n".to_string())).await?;
                }

                _ = watchdog.tick(), if silence_limit.is_some() => {
                    if let Some(limit) = silence_limit {
                        if last_seen.elapsed() > limit {
                            return Err(ClientError::HeartbeatTimeout(limit));
                        }
                    }
                }
            }
        }
    }

    fn on_text(&self, text: &str) -> ClientResult<()> {
        let frame = match Frame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "dropping malformed STOMP frame");
                return Ok(());
            }
        };
        match frame.command {
            StompCommand::Message => {
                if self.shared.is_current(self.epoch) {
                    let invoked = self.shared.listeners.dispatch_raw(&frame.body);
                    debug!(
                        destination = frame.header("destination").unwrap_or_default(),
                        invoked, "event dispatched"
                    );
                }
                Ok(())
            }
            StompCommand::Error => Err(ClientError::Broker(error_message(&frame))),
            other => {
                debug!(command = %other, "ignoring frame");
                Ok(())
            }
        }
    }
}

/// Subscription ids sent on the current connection, in subscribe order.
#[derive(Debug, Default)]
struct LiveSubscriptions {
    ids: Vec<String>,
}

impl LiveSubscriptions {
    /// Returns `false` if `id` is already live.
    fn insert(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id.to_string());
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|live| live != id);
        self.ids.len() != before
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|live| live == id)
    }

    /// Ids to unsubscribe on close, most recent first.
    fn ids(&self) -> Vec<String> {
        self.ids.iter().rev().cloned().collect()
    }
}

/// Await `fut` while the session is offline. Commands that need a live socket
/// are dropped; `None` means the session was told to stop.
async fn until<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = commands.recv() => match cmd {
                None | Some(SessionCommand::Disconnect) => return None,
                Some(SessionCommand::Send { destination, .. }) => {
                    warn!(destination = %destination, "not connected; dropping outbound message");
                }
                // Thread subscriptions stay in the table and are replayed on connect.
                Some(SessionCommand::Subscribe(_)) | Some(SessionCommand::Unsubscribe(_)) => {}
            },
        }
    }
}

/// WebSocket upgrade plus STOMP CONNECT/CONNECTED exchange.
#[instrument(skip_all, fields(url = %config.broker_url))]
async fn handshake(config: &ClientConfig, token: &str) -> ClientResult<(WsStream, Heartbeat)> {
    let bearer = format!("Bearer {}", token);
    let mut request = config.broker_url.as_str().into_client_request()?;
    let header = HeaderValue::from_str(&bearer)
        .map_err(|_| ClientError::InvalidRequest("token is not a valid header value".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, header);
    let host = request.uri().host().unwrap_or("localhost").to_string();

    let (mut ws, _response) = connect_async(request).await.map_err(|e| match e {
        tungstenite::Error::Http(response) => {
            ClientError::Rejected(format!("HTTP {}", response.status()))
        }
        other => ClientError::WebSocket(other),
    })?;

    let offer = (
        config.heartbeat_outgoing.as_millis() as u64,
        config.heartbeat_incoming.as_millis() as u64,
    );
    let connect = Frame::new(StompCommand::Connect)
        .with_header("accept-version", "1.2")
        .with_header("host", host)
        .with_header("heart-beat", format!("{},{}", offer.0, offer.1))
        .with_header("Authorization", bearer);
    ws.send(Message::Text(connect.encode())).await?;

    loop {
        let msg = ws
            .next()
            .await
            .ok_or_else(|| ClientError::Closed("stream ended during handshake".to_string()))??;
        match msg {
            Message::Text(text) => match Frame::parse(&text)? {
                Some(frame) if frame.command == StompCommand::Connected => {
                    let heartbeat = Heartbeat::negotiate(offer, frame.header("heart-beat"));
                    debug!(
                        version = frame.header("version").unwrap_or("1.2"),
                        ?heartbeat,
                        "STOMP session established"
                    );
                    return Ok((ws, heartbeat));
                }
                Some(frame) if frame.command == StompCommand::Error => {
                    return Err(ClientError::Rejected(error_message(&frame)));
                }
                Some(frame) => debug!(command = %frame.command, "ignoring frame before CONNECTED"),
                None => {}
            },
            Message::Close(frame) => return Err(ClientError::Closed(close_reason(frame))),
            _ => {}
        }
    }
}

async fn close_gracefully(sink: &mut WsSink, unsubscribe: &[String]) {
    for id in unsubscribe {
        let _ = sink.send(unsubscribe_frame(id)).await;
    }
    let disconnect = Frame::new(StompCommand::Disconnect).with_header("receipt", "disconnect");
    let _ = sink.send(Message::Text(disconnect.encode())).await;
    let _ = sink.close().await;
    info!(unsubscribed = unsubscribe.len(), "closed broker connection");
}

fn subscribe_frame(handle: &SubscriptionHandle) -> Message {
    let frame = Frame::new(StompCommand::Subscribe)
        .with_header("id", handle.id.as_str())
        .with_header("destination", handle.destination.as_str())
        .with_header("ack", "auto");
    Message::Text(frame.encode())
}

fn unsubscribe_frame(id: &str) -> Message {
    Message::Text(Frame::new(StompCommand::Unsubscribe).with_header("id", id).encode())
}

fn send_frame(destination: &str, body: String) -> Message {
    let frame = Frame::new(StompCommand::Send)
        .with_header("destination", destination)
        .with_header("content-type", "application/json")
        .with_header("content-length", body.len().to_string())
        .with_body(body);
    Message::Text(frame.encode())
}

fn error_message(frame: &Frame) -> String {
    match frame.header("message") {
        Some(message) => message.to_string(),
        None => frame.body.trim().to_string(),
    }
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> String {
    match frame {
        Some(f) => format!("{} (code {})", f.reason, u16::from(f.code)),
        None => "closed without a close frame".to_string(),
    }
}
