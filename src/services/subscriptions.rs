//! Subscription table: at most one live broker subscription per topic key.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::models::topic::TopicKey;

/// Broker-side handle of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub key: TopicKey,
    /// STOMP `id` header; unique within the client.
    pub id: String,
    pub destination: String,
}

#[derive(Default)]
pub struct SubscriptionTable {
    entries: Mutex<HashMap<TopicKey, SubscriptionHandle>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription for `key` unless one exists. Returns the new handle.
    pub fn insert_if_absent(&self, key: TopicKey, destination: String) -> Option<SubscriptionHandle> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return None;
        }
        let handle = SubscriptionHandle {
            key,
            id: format!("sub-{}", Uuid::new_v4().as_simple()),
            destination,
        };
        entries.insert(key, handle.clone());
        Some(handle)
    }

    pub fn remove(&self, key: TopicKey) -> Option<SubscriptionHandle> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
    }

    /// Remove and return everything.
    pub fn drain(&self) -> Vec<SubscriptionHandle> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }

    /// Current entries, general topic first.
    pub fn snapshot(&self) -> Vec<SubscriptionHandle> {
        let mut handles: Vec<SubscriptionHandle> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by_key(|h| match h.key {
            TopicKey::General => (0, 0),
            TopicKey::Thread(id) => (1, id),
        });
        handles
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
