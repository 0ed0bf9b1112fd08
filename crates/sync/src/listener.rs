//! Backend side of mute sync.

use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::BackendMuteCache;
use crate::protocol::{MuteData, MuteDataKind, PROTOCOL_VERSION};

/// Applies received frames to a [`BackendMuteCache`].
#[derive(Clone)]
pub struct MuteSyncListener {
    cache: BackendMuteCache,
}

impl MuteSyncListener {
    /// Listener feeding `cache`.
    #[must_use]
    pub const fn new(cache: BackendMuteCache) -> Self {
        Self { cache }
    }

    /// The cache being fed.
    #[must_use]
    pub const fn cache(&self) -> &BackendMuteCache {
        &self.cache
    }

    /// Decode and apply one frame.
    ///
    /// Malformed frames and unknown message types are logged and dropped.
    /// Returns whether the cache changed.
    pub async fn handle_frame(&self, frame: &[u8]) -> bool {
        let data = match MuteData::decode(frame) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Dropping malformed mute sync frame");
                return false;
            }
        };

        if data.version != PROTOCOL_VERSION {
            warn!(
                version = data.version,
                expected = PROTOCOL_VERSION,
                "Mute sync protocol version mismatch"
            );
        }
        if data.kind == MuteDataKind::Unknown {
            warn!(user_id = %data.uuid, "Dropping mute sync message of unknown type");
            return false;
        }

        match self.cache.apply(&data).await {
            Ok(changed) => {
                debug!(user_id = %data.uuid, kind = ?data.kind, changed, "Applied mute sync message");
                changed
            }
            Err(e) => {
                warn!(user_id = %data.uuid, kind = ?data.kind, error = %e, "Dropping invalid mute sync message");
                false
            }
        }
    }

    /// Consume frames from `rx` until the channel closes.
    pub fn spawn(self, mut rx: broadcast::Receiver<Bytes>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        self.handle_frame(&frame).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Mute sync listener lagged behind, messages lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Mute sync listener stopped");
        })
    }
}
