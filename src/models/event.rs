//! Discussion events carried over the broker: `{ "type": ..., "payload": {...} }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The closed set of event kinds the forum publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ThreadCreated,
    ThreadUpdated,
    ThreadDeleted,
    ReplyCreated,
    ReplyUpdated,
    ReplyDeleted,
    ThreadPinned,
    ThreadLocked,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::ThreadCreated,
        EventKind::ThreadUpdated,
        EventKind::ThreadDeleted,
        EventKind::ReplyCreated,
        EventKind::ReplyUpdated,
        EventKind::ReplyDeleted,
        EventKind::ThreadPinned,
        EventKind::ThreadLocked,
    ];

    /// Wire name, e.g. `reply_created`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ThreadCreated => "thread_created",
            EventKind::ThreadUpdated => "thread_updated",
            EventKind::ThreadDeleted => "thread_deleted",
            EventKind::ReplyCreated => "reply_created",
            EventKind::ReplyUpdated => "reply_updated",
            EventKind::ReplyDeleted => "reply_deleted",
            EventKind::ThreadPinned => "thread_pinned",
            EventKind::ThreadLocked => "thread_locked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventKind(pub String);

/// Reads a field as an integer id. Accepts JSON integers, integral floats and numeric strings.
fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

macro_rules! payload_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Value);

        impl $name {
            /// The payload exactly as the publisher sent it.
            pub fn as_value(&self) -> &Value {
                &self.0
            }

            pub fn into_value(self) -> Value {
                self.0
            }

            /// Top-level field of an object payload.
            pub fn get(&self, key: &str) -> Option<&Value> {
                self.0.get(key)
            }

            pub fn id(&self) -> Option<i64> {
                lenient_i64(self.get("id"))
            }

            pub fn content(&self) -> Option<&str> {
                self.get("content").and_then(Value::as_str)
            }

            pub fn author_name(&self) -> Option<&str> {
                self.get("authorName").and_then(Value::as_str)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self(Value::Object(Map::new()))
            }
        }

        impl From<Value> for $name {
            fn from(value: Value) -> Self {
                Self(value)
            }
        }
    };
}

payload_type! {
    /// Payload of `thread_*` events. Typed getters return `None` when a field
    /// is absent or has an unexpected shape; the raw value is always kept.
    ThreadPayload
}

payload_type! {
    /// Payload of `reply_*` events.
    ReplyPayload
}

impl ThreadPayload {
    /// The thread this event is about; publishers use either `threadId` or `id`.
    pub fn thread_id(&self) -> Option<i64> {
        lenient_i64(self.get("threadId")).or_else(|| self.id())
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }

    pub fn category(&self) -> Option<&str> {
        self.get("category").and_then(Value::as_str)
    }

    pub fn pinned(&self) -> Option<bool> {
        lenient_bool(self.get("pinned"))
    }

    pub fn locked(&self) -> Option<bool> {
        lenient_bool(self.get("locked"))
    }
}

impl ReplyPayload {
    pub fn thread_id(&self) -> Option<i64> {
        lenient_i64(self.get("threadId"))
    }
}

/// A decoded discussion event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DiscussionEvent {
    ThreadCreated(ThreadPayload),
    ThreadUpdated(ThreadPayload),
    ThreadDeleted(ThreadPayload),
    ReplyCreated(ReplyPayload),
    ReplyUpdated(ReplyPayload),
    ReplyDeleted(ReplyPayload),
    ThreadPinned(ThreadPayload),
    ThreadLocked(ThreadPayload),
}

/// Raw wire envelope, before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    UnknownKind(#[from] UnknownEventKind),
}

impl DiscussionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DiscussionEvent::ThreadCreated(_) => EventKind::ThreadCreated,
            DiscussionEvent::ThreadUpdated(_) => EventKind::ThreadUpdated,
            DiscussionEvent::ThreadDeleted(_) => EventKind::ThreadDeleted,
            DiscussionEvent::ReplyCreated(_) => EventKind::ReplyCreated,
            DiscussionEvent::ReplyUpdated(_) => EventKind::ReplyUpdated,
            DiscussionEvent::ReplyDeleted(_) => EventKind::ReplyDeleted,
            DiscussionEvent::ThreadPinned(_) => EventKind::ThreadPinned,
            DiscussionEvent::ThreadLocked(_) => EventKind::ThreadLocked,
        }
    }

    pub fn thread(&self) -> Option<&ThreadPayload> {
        match self {
            DiscussionEvent::ThreadCreated(p)
            | DiscussionEvent::ThreadUpdated(p)
            | DiscussionEvent::ThreadDeleted(p)
            | DiscussionEvent::ThreadPinned(p)
            | DiscussionEvent::ThreadLocked(p) => Some(p),
            _ => None,
        }
    }

    pub fn reply(&self) -> Option<&ReplyPayload> {
        match self {
            DiscussionEvent::ReplyCreated(p)
            | DiscussionEvent::ReplyUpdated(p)
            | DiscussionEvent::ReplyDeleted(p) => Some(p),
            _ => None,
        }
    }

    /// The payload exactly as received.
    pub fn payload(&self) -> &Value {
        match self {
            DiscussionEvent::ThreadCreated(p)
            | DiscussionEvent::ThreadUpdated(p)
            | DiscussionEvent::ThreadDeleted(p)
            | DiscussionEvent::ThreadPinned(p)
            | DiscussionEvent::ThreadLocked(p) => p.as_value(),
            DiscussionEvent::ReplyCreated(p)
            | DiscussionEvent::ReplyUpdated(p)
            | DiscussionEvent::ReplyDeleted(p) => p.as_value(),
        }
    }

    /// Thread id carried by the payload, whichever shape it has.
    pub fn thread_id(&self) -> Option<i64> {
        match self.thread() {
            Some(p) => p.thread_id(),
            None => self.reply().and_then(ReplyPayload::thread_id),
        }
    }

    /// Decode a frame body. Only malformed JSON and unknown kinds are errors;
    /// the payload is passed through untouched.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(body)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let kind: EventKind = envelope.event_type.parse()?;
        let payload = match envelope.payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Ok(match kind {
            EventKind::ThreadCreated => DiscussionEvent::ThreadCreated(payload.into()),
            EventKind::ThreadUpdated => DiscussionEvent::ThreadUpdated(payload.into()),
            EventKind::ThreadDeleted => DiscussionEvent::ThreadDeleted(payload.into()),
            EventKind::ThreadPinned => DiscussionEvent::ThreadPinned(payload.into()),
            EventKind::ThreadLocked => DiscussionEvent::ThreadLocked(payload.into()),
            EventKind::ReplyCreated => DiscussionEvent::ReplyCreated(payload.into()),
            EventKind::ReplyUpdated => DiscussionEvent::ReplyUpdated(payload.into()),
            EventKind::ReplyDeleted => DiscussionEvent::ReplyDeleted(payload.into()),
        })
    }

    /// Encode as a wire envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
