//! Cross-instance invalidation fan-out over Redis Pub/Sub.
//!
//! The memory tier is strictly per-process: without help, an invalidation on
//! one instance leaves the others serving their memory copy for up to the
//! memory TTL. Fan-out narrows that window (it does not close it — delivery
//! is best-effort and an instance that is down misses the message, which the
//! short memory TTLs cover).
//!
//! ```text
//! Instance 1: cache.invalidate(key)
//!   ↓
//! Redis Pub/Sub: PUBLISH portico:cache:invalidate {"kind":"key","value":...}
//!   ↓
//! Instance 2: listener removes the key from its memory tier
//! Instance 3: listener removes the key from its memory tier
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::store::{HybridCache, MemoryEntry};

/// Channel carrying invalidation envelopes.
pub const INVALIDATION_CHANNEL: &str = "portico:cache:invalidate";

/// Wire envelope for one invalidation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum InvalidationMessage {
    /// Remove one exact key.
    Key(String),
    /// Remove every key starting with this prefix.
    Prefix(String),
}

/// Publishes invalidation events for other instances.
///
/// Publishing is fire-and-forget: the local tiers are already consistent
/// when a publish happens, so a lost message only delays remote memory
/// tiers until their TTL.
#[derive(Clone)]
pub struct InvalidationPublisher {
    pool: Pool,
}

impl InvalidationPublisher {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn publish_key(&self, key: &str) {
        self.publish(InvalidationMessage::Key(key.to_string()));
    }

    pub fn publish_prefix(&self, prefix: &str) {
        self.publish(InvalidationMessage::Prefix(prefix.to_string()));
    }

    fn publish(&self, message: InvalidationMessage) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let payload = match serde_json::to_string(&message) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode invalidation message");
                    return;
                }
            };
            match pool.get().await {
                Ok(mut conn) => {
                    if let Err(e) = conn
                        .publish::<_, _, ()>(INVALIDATION_CHANNEL, &payload)
                        .await
                    {
                        tracing::warn!(error = %e, "failed to publish invalidation");
                    } else {
                        tracing::debug!(message = %payload, "published invalidation");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to get Redis connection for publish");
                }
            }
        });
    }
}

/// Subscribes to the invalidation channel and applies events to the local
/// memory tier. Reconnects with exponential backoff on connection loss.
pub struct InvalidationListener {
    redis_url: String,
    memory: Arc<DashMap<String, MemoryEntry>>,
}

impl InvalidationListener {
    pub fn new(redis_url: impl Into<String>, cache: &HybridCache) -> Self {
        Self {
            redis_url: redis_url.into(),
            memory: cache.memory_handle(),
        }
    }

    /// Spawn the background listener task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match self.run().await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "invalidation listener error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        // Pub/sub needs a dedicated connection outside the pool.
        let client = redis::Client::open(self.redis_url.clone())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        pubsub
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = INVALIDATION_CHANNEL, "subscribed to invalidation channel");

        let mut stream = pubsub.on_message();
        loop {
            match stream.next().await {
                Some(msg) => {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "unreadable invalidation payload");
                            continue;
                        }
                    };
                    match serde_json::from_str::<InvalidationMessage>(&payload) {
                        Ok(message) => self.apply(message),
                        Err(e) => {
                            tracing::warn!(error = %e, payload = %payload, "malformed invalidation message");
                        }
                    }
                }
                None => return Err("pub/sub connection closed".to_string()),
            }
        }
    }

    fn apply(&self, message: InvalidationMessage) {
        match message {
            InvalidationMessage::Key(key) => {
                tracing::debug!(key = %key, "received key invalidation");
                self.memory.remove(&key);
            }
            InvalidationMessage::Prefix(prefix) => {
                tracing::debug!(prefix = %prefix, "received prefix invalidation");
                self.memory.retain(|key, _| !key.starts_with(&prefix));
            }
        }
    }
}
