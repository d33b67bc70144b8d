//! Client-side bookkeeping: listener fan-out, subscription table, reconnect policy.

pub mod listeners;
pub mod reconnect;
pub mod subscriptions;

pub use listeners::{Listener, ListenerHandle, ListenerId, ListenerRegistry};
pub use reconnect::ReconnectPolicy;
pub use subscriptions::{SubscriptionHandle, SubscriptionTable};
