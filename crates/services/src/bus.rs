use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-job publish/subscribe channel.
///
/// Publish is fire-and-forget. Late subscribers receive only messages
/// published after they subscribed; the SSE backfill path reads older
/// segments from the durable store instead.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn publish(&self, job_id: &str, payload: &serde_json::Value);

    /// Produces messages for one job until the receiver is dropped or a
    /// terminal event ends the stream on the consumer side.
    async fn subscribe(&self, job_id: &str) -> mpsc::Receiver<serde_json::Value>;
}

fn channel_name(job_id: &str) -> String {
    format!("job_events:{job_id}")
}

/// Redis pub/sub implementation. The publish side goes through the shared
/// connection manager (reconnects transparently); each subscription holds
/// its own pub/sub connection for the life of the consumer.
pub struct RedisEventBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisEventBus {
    pub fn new(client: redis::Client, publisher: ConnectionManager) -> Self {
        Self { client, publisher }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, job_id: &str, payload: &serde_json::Value) {
        let channel = channel_name(job_id);
        let message = payload.to_string();
        let mut conn = self.publisher.clone();

        match conn.publish::<_, _, ()>(&channel, message).await {
            Ok(()) => debug!(
                %channel,
                message_type = payload.get("type").and_then(|t| t.as_str()).unwrap_or(""),
                "event published"
            ),
            Err(e) => error!(%channel, error = %e, "event publish failed"),
        }
    }

    async fn subscribe(&self, job_id: &str) -> mpsc::Receiver<serde_json::Value> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let channel = channel_name(job_id);

        tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    error!(%channel, error = %e, "pub/sub connection failed");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                error!(%channel, error = %e, "channel subscribe failed");
                return;
            }
            info!(%channel, "subscription started");

            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(%channel, error = %e, "unreadable pub/sub payload, skipping");
                        continue;
                    }
                };
                let value: serde_json::Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(%channel, error = %e, "non-JSON pub/sub payload, skipping");
                        continue;
                    }
                };
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            debug!(%channel, "subscription ended");
        });

        rx
    }
}
