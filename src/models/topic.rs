//! Topic keys and how they map onto broker destinations.

use std::fmt;

use crate::config::ClientConfig;

/// Key of a live subscription: the general broadcast topic or one thread's topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKey {
    General,
    Thread(i64),
}

impl TopicKey {
    /// Broker destination for this key, e.g. `/topic/discussion/thread/42`.
    pub fn destination(&self, config: &ClientConfig) -> String {
        match self {
            TopicKey::General => config.general_topic.clone(),
            TopicKey::Thread(id) => format!("{}{}", config.thread_topic_prefix, id),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKey::General => f.write_str("general"),
            TopicKey::Thread(id) => write!(f, "thread-{}", id),
        }
    }
}
