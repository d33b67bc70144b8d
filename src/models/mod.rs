//! Data models for events, topics, and connection state.

pub mod event;
pub mod state;
pub mod topic;

pub use event::*;
pub use state::*;
pub use topic::*;
