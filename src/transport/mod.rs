//! STOMP-over-WebSocket transport: frame codec and the connection session.

pub mod frame;
pub(crate) mod session;

pub use frame::{Frame, FrameError, Heartbeat, StompCommand};
