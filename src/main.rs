//! Entry point: load config, connect, and log discussion activity until Ctrl-C.

use discussion_realtime::config::Config;
use discussion_realtime::{ConnectionState, DiscussionClient, EventKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let token = config
        .auth_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("AUTH_TOKEN is required"))?;

    let client = DiscussionClient::new(config.client.clone());
    let mut handles = Vec::new();
    for kind in EventKind::ALL {
        handles.push(client.on(kind, move |event| {
            let payload = serde_json::to_string(event).unwrap_or_default();
            tracing::info!(event = %kind, thread = ?event.thread_id(), %payload, "activity");
        }));
    }

    let mut states = client.state_changes();
    client.connect(token);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Connected => {
                        for thread_id in &config.watch_threads {
                            client.subscribe_to_thread(*thread_id);
                        }
                        tracing::info!(stats = ?client.stats(), "watching");
                    }
                    ConnectionState::Exhausted => {
                        tracing::error!(stats = ?client.stats(), "broker unreachable; giving up");
                        break;
                    }
                    other => tracing::info!(state = %other, "connection state"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    for handle in &handles {
        handle.unsubscribe();
    }
    client.disconnect();
    Ok(())
}
