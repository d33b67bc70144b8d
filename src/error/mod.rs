//! Error types for the transport session and frame codec.
//!
//! None of these escape the public client operations: the session logs them
//! and feeds them into the reconnect policy.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::transport::frame::FrameError;

/// Client-level errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("No heart-beat from broker for {0:?}")]
    HeartbeatTimeout(std::time::Duration),
}

pub type ClientResult<T> = Result<T, ClientError>;
