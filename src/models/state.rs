//! Connection state and the introspection snapshot exposed to status widgets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect budget spent; stays here until `connect()` is called again.
    Exhausted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub connected: bool,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub active_subscriptions: usize,
    pub active_listeners: usize,
    pub last_connected_at: Option<DateTime<Utc>>,
}
