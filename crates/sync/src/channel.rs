//! Transports carrying mute sync frames from the front node to backends.

use async_trait::async_trait;
use bytes::Bytes;
use fred::clients::{Client, SubscriberClient};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as FredConfig;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use warden_common::{AppError, AppResult, RedisConfig};

const LOCAL_CAPACITY: usize = 1000;

/// A fire-and-forget broadcast channel for encoded frames.
#[async_trait]
pub trait MuteChannel: Send + Sync {
    /// Publish one frame to every subscriber.
    async fn publish(&self, frame: Bytes) -> AppResult<()>;

    /// Receive frames published after this call.
    fn subscribe(&self) -> broadcast::Receiver<Bytes>;
}

/// Mute sync over Redis pub/sub.
#[derive(Clone)]
pub struct RedisMuteChannel {
    publisher: Client,
    subscriber: SubscriberClient,
    channel: String,
    local_tx: broadcast::Sender<Bytes>,
}

impl RedisMuteChannel {
    /// Connect both clients.
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let fred_config = FredConfig::from_url(&config.url).map_err(redis_error)?;

        let publisher = Client::new(fred_config.clone(), None, None, None);
        publisher.init().await.map_err(redis_error)?;

        let subscriber = SubscriberClient::new(fred_config, None, None, None);
        subscriber.init().await.map_err(redis_error)?;

        let (local_tx, _) = broadcast::channel(LOCAL_CAPACITY);
        let channel = config.mute_channel();
        info!(channel = %channel, "Redis mute channel initialized");

        Ok(Self {
            publisher,
            subscriber,
            channel,
            local_tx,
        })
    }

    /// Name of the Redis channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe to the Redis channel and forward frames to local receivers.
    ///
    /// Only backends need to call this.
    pub async fn start(&self) -> AppResult<()> {
        self.subscriber
            .subscribe(self.channel.as_str())
            .await
            .map_err(redis_error)?;
        info!(channel = %self.channel, "Subscribed to mute channel");

        let local_tx = self.local_tx.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                let Some(frame) = message.value.as_bytes() else {
                    warn!("Ignoring mute channel message without a binary payload");
                    continue;
                };
                if local_tx.send(Bytes::copy_from_slice(frame)).is_err() {
                    debug!("No local subscribers for mute frame");
                }
            }
            info!("Mute channel message stream ended");
        });

        Ok(())
    }

    /// Close both clients.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.subscriber.quit().await.map_err(redis_error)?;
        self.publisher.quit().await.map_err(redis_error)?;
        info!("Redis mute channel shutdown");
        Ok(())
    }
}

#[async_trait]
impl MuteChannel for RedisMuteChannel {
    async fn publish(&self, frame: Bytes) -> AppResult<()> {
        let receivers: i64 = self
            .publisher
            .publish(self.channel.as_str(), frame)
            .await
            .map_err(redis_error)?;
        debug!(channel = %self.channel, receivers, "Published mute frame");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.local_tx.subscribe()
    }
}

fn redis_error(e: fred::error::Error) -> AppError {
    AppError::Redis(e.to_string())
}

/// In-process channel for single-process deployments and tests.
#[derive(Clone)]
pub struct LocalMuteChannel {
    tx: broadcast::Sender<Bytes>,
}

impl LocalMuteChannel {
    /// Create a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOCAL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalMuteChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MuteChannel for LocalMuteChannel {
    async fn publish(&self, frame: Bytes) -> AppResult<()> {
        // Like Redis, a publish without subscribers is not an error.
        let receivers = self.tx.send(frame).unwrap_or(0);
        debug!(receivers, "Published mute frame locally");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}
