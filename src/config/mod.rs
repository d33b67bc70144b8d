//! Client configuration loaded from environment.

use std::time::Duration;

/// Settings the [`DiscussionClient`](crate::DiscussionClient) needs to reach the broker.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker WebSocket endpoint (e.g. `ws://localhost:8080/ws`).
    pub broker_url: String,
    /// Broadcast topic subscribed after every successful connect.
    pub general_topic: String,
    /// Per-thread topic prefix; the thread id is appended.
    pub thread_topic_prefix: String,
    /// Automatic reconnect budget.
    pub max_reconnect_attempts: u32,
    /// Linear backoff base: attempt `n` waits `n * reconnect_base_delay`.
    pub reconnect_base_delay: Duration,
    /// Client-to-server heart-beat we offer. Zero disables it.
    pub heartbeat_outgoing: Duration,
    /// Server-to-client heart-beat we ask for. Zero disables it.
    pub heartbeat_incoming: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://localhost:8080/ws".to_string(),
            general_topic: "/topic/discussions".to_string(),
            thread_topic_prefix: "/topic/discussion/thread/".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(3000),
            heartbeat_outgoing: Duration::from_millis(10_000),
            heartbeat_incoming: Duration::from_millis(10_000),
        }
    }
}

impl ClientConfig {
    /// Same defaults, different endpoint.
    pub fn with_broker_url(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Self::default()
        }
    }
}

/// Full configuration for the watcher binary, loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    /// Bearer token presented at connect time.
    pub auth_token: Option<String>,
    /// Threads to follow once connected.
    pub watch_threads: Vec<i64>,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ClientConfig::default();

        let broker_url = lookup("BROKER_URL").unwrap_or(defaults.broker_url);
        if !(broker_url.starts_with("ws://") || broker_url.starts_with("wss://")) {
            return Err(ConfigLoadError::InvalidBrokerUrl(broker_url));
        }
        let general_topic = lookup("GENERAL_TOPIC").unwrap_or(defaults.general_topic);
        let thread_topic_prefix =
            lookup("THREAD_TOPIC_PREFIX").unwrap_or(defaults.thread_topic_prefix);

        let max_reconnect_attempts = match lookup("MAX_RECONNECT_ATTEMPTS") {
            Some(v) => u32::try_from(parse_number("MAX_RECONNECT_ATTEMPTS", &v)?)
                .map_err(|_| ConfigLoadError::InvalidNumber("MAX_RECONNECT_ATTEMPTS"))?,
            None => defaults.max_reconnect_attempts,
        };
        let reconnect_base_delay =
            duration_ms(&lookup, "RECONNECT_BASE_DELAY_MS", defaults.reconnect_base_delay)?;
        let heartbeat_outgoing =
            duration_ms(&lookup, "HEARTBEAT_OUTGOING_MS", defaults.heartbeat_outgoing)?;
        let heartbeat_incoming =
            duration_ms(&lookup, "HEARTBEAT_INCOMING_MS", defaults.heartbeat_incoming)?;

        let auth_token = lookup("AUTH_TOKEN").filter(|t| !t.trim().is_empty());
        let watch_threads = match lookup("WATCH_THREADS") {
            Some(raw) => parse_thread_ids(&raw)?,
            None => Vec::new(),
        };
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            client: ClientConfig {
                broker_url,
                general_topic,
                thread_topic_prefix,
                max_reconnect_attempts,
                reconnect_base_delay,
                heartbeat_outgoing,
                heartbeat_incoming,
            },
            auth_token,
            watch_threads,
            log_level,
        })
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigLoadError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigLoadError::InvalidNumber(var))
}

fn duration_ms<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(v) => Ok(Duration::from_millis(parse_number(var, &v)?)),
        None => Ok(default),
    }
}

fn parse_thread_ids(raw: &str) -> Result<Vec<i64>, ConfigLoadError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ConfigLoadError::InvalidThreadId(s.to_string()))
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid BROKER_URL (expected ws:// or wss://): {0}")]
    InvalidBrokerUrl(String),

    #[error("Invalid {0}: expected a non-negative integer")]
    InvalidNumber(&'static str),

    #[error("Invalid thread id in WATCH_THREADS: {0}")]
    InvalidThreadId(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigLoadError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = load(&[]).unwrap();
        assert_eq!(config.client.broker_url, "ws://localhost:8080/ws");
        assert_eq!(config.client.max_reconnect_attempts, 5);
        assert_eq!(config.client.reconnect_base_delay, Duration::from_secs(3));
        assert!(config.auth_token.is_none());
        assert!(config.watch_threads.is_empty());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("BROKER_URL", "wss://forum.example.com/ws"),
            ("MAX_RECONNECT_ATTEMPTS", "2"),
            ("RECONNECT_BASE_DELAY_MS", "250"),
            ("HEARTBEAT_OUTGOING_MS", "0"),
            ("AUTH_TOKEN", "t1"),
            ("WATCH_THREADS", "42, 7,"),
        ])
        .unwrap();
        assert_eq!(config.client.broker_url, "wss://forum.example.com/ws");
        assert_eq!(config.client.max_reconnect_attempts, 2);
        assert_eq!(config.client.reconnect_base_delay, Duration::from_millis(250));
        assert_eq!(config.client.heartbeat_outgoing, Duration::ZERO);
        assert_eq!(config.auth_token.as_deref(), Some("t1"));
        assert_eq!(config.watch_threads, vec![42, 7]);
    }

    #[test]
    fn rejects_non_websocket_url() {
        assert!(matches!(
            load(&[("BROKER_URL", "http://localhost:8080/ws")]),
            Err(ConfigLoadError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn rejects_bad_numbers_and_thread_ids() {
        assert!(matches!(
            load(&[("RECONNECT_BASE_DELAY_MS", "soon")]),
            Err(ConfigLoadError::InvalidNumber("RECONNECT_BASE_DELAY_MS"))
        ));
        assert!(matches!(
            load(&[("WATCH_THREADS", "42,abc")]),
            Err(ConfigLoadError::InvalidThreadId(id)) if id == "abc"
        ));
    }

    #[test]
    fn attempt_budget_out_of_range_is_rejected() {
        assert!(matches!(
            load(&[("MAX_RECONNECT_ATTEMPTS", "4294967296")]),
            Err(ConfigLoadError::InvalidNumber("MAX_RECONNECT_ATTEMPTS"))
        ));
        let config = load(&[("MAX_RECONNECT_ATTEMPTS", "4294967295")]).unwrap();
        assert_eq!(config.client.max_reconnect_attempts, u32::MAX);
    }
}
