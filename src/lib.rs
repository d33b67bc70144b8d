//! Real-time discussion event client built with Rust.
//!
//! Holds one STOMP-over-WebSocket connection to the forum's broker,
//! subscribes the general discussion topic plus per-thread topics, and fans
//! decoded events out to locally registered listeners. Reconnects with a
//! bounded linear backoff.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod transport;

pub use client::DiscussionClient;
pub use config::{ClientConfig, Config};
pub use error::{ClientError, ClientResult};
pub use models::{
    ClientStats, ConnectionState, DiscussionEvent, EventKind, ReplyPayload, ThreadPayload,
    TopicKey,
};
pub use services::{ListenerHandle, ReconnectPolicy};
