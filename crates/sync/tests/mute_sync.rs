//! End-to-end mute sync tests over the in-process channel.
//!
//! A front node issues, changes and cancels mutes through the punishment
//! service; a backend listener applies the resulting frames to its cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;
use warden_common::{AppError, AppResult};
use warden_core::testing::{InMemoryPunishmentLogStore, InMemoryPunishmentStore};
use warden_core::{
    ChangeInput, EventDispatcher, EventKind, InMemoryUserResolver, NewPunishment,
    PunishmentDuration, PunishmentKind, PunishmentService, PunishmentState, PunishmentStore,
};
use warden_sync::{
    BackendMuteCache, ChatDecision, LocalMuteChannel, MuteChannel, MuteSyncCommunicator,
    MuteSyncListener,
};

struct Network {
    service: PunishmentService,
    communicator: MuteSyncCommunicator,
    cache: BackendMuteCache,
}

fn network_over(channel: Arc<dyn MuteChannel>) -> Network {
    let service = PunishmentService::new(
        Arc::new(InMemoryPunishmentStore::new()),
        Arc::new(InMemoryPunishmentLogStore::new()),
        Arc::new(InMemoryUserResolver::new()),
        EventDispatcher::new(),
    );
    let cache = BackendMuteCache::new();
    MuteSyncListener::new(cache.clone()).spawn(channel.subscribe());
    let communicator = MuteSyncCommunicator::start(service.clone(), channel, 16);

    Network {
        service,
        communicator,
        cache,
    }
}

fn network() -> Network {
    network_over(Arc::new(LocalMuteChannel::new()))
}

fn mute(user_id: Uuid, duration: &str) -> NewPunishment {
    NewPunishment {
        user_id,
        kind: PunishmentKind::Mute,
        reason: "Spamming in chat".to_string(),
        duration: PunishmentDuration::parse(duration).unwrap(),
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Issuing a 10 minute mute blocks chat on the backend with the mute's reason.
#[tokio::test]
async fn test_issued_mute_blocks_chat() {
    let net = network();
    let user_id = Uuid::new_v4();

    let punishment = net.service.issue(mute(user_id, "10m"), None).await.unwrap();
    eventually(|| async { net.cache.len().await == 1 }).await;

    let mutes = net.cache.mutes_for(user_id).await;
    let cached = &mutes[0];
    assert_eq!(cached.punishment_id, punishment.id());
    let expected = Utc::now().timestamp_millis() + 600_000;
    let expiration = cached.duration.expiration_millis().unwrap();
    assert!((expected - expiration).abs() < 5_000);

    match net.cache.check_chat(user_id).await {
        ChatDecision::Blocked(mute) => assert_eq!(mute.reason, "Spamming in chat"),
        ChatDecision::Allowed => panic!("chat should be blocked"),
    }
}

/// Cancelling the mute unblocks chat.
#[tokio::test]
async fn test_cancelled_mute_unblocks_chat() {
    let net = network();
    let user_id = Uuid::new_v4();

    let punishment = net.service.issue(mute(user_id, "10m"), None).await.unwrap();
    eventually(|| async { net.cache.check_chat(user_id).await.is_blocked() }).await;

    net.service.cancel(punishment.id(), None).await.unwrap();
    eventually(|| async { !net.cache.check_chat(user_id).await.is_blocked() }).await;
    assert!(net.cache.is_empty().await);
}

/// A zero-length mute reaches the backend already expired and is evicted on read.
#[tokio::test]
async fn test_elapsed_mute_is_evicted_on_chat() {
    let net = network();
    let user_id = Uuid::new_v4();

    net.service.issue(mute(user_id, "0s"), None).await.unwrap();
    eventually(|| async { net.cache.len().await == 1 }).await;

    assert_eq!(net.cache.check_chat(user_id).await, ChatDecision::Allowed);
    assert!(net.cache.is_empty().await);
}

/// A vetoed cancellation leaves the backend blocking chat.
#[tokio::test]
async fn test_vetoed_cancel_keeps_backend_blocked() {
    let net = network();
    net.service
        .dispatcher()
        .register(EventKind::Cancelled, |envelope| {
            envelope.cancel();
            Ok(())
        });
    let user_id = Uuid::new_v4();

    let punishment = net.service.issue(mute(user_id, "10m"), None).await.unwrap();
    eventually(|| async { net.cache.len().await == 1 }).await;

    let result = net.service.cancel(punishment.id(), None).await;
    assert!(matches!(result, Err(AppError::OperationCancelled(_))));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(net.cache.check_chat(user_id).await.is_blocked());
}

/// Changing a mute updates the cached entry in place.
#[tokio::test]
async fn test_changed_mute_updates_cache() {
    let net = network();
    let user_id = Uuid::new_v4();

    let original = net.service.issue(mute(user_id, "10m"), None).await.unwrap();
    eventually(|| async { net.cache.len().await == 1 }).await;

    let revision = net
        .service
        .change(
            original.id(),
            ChangeInput {
                reason: "Advertising".to_string(),
                duration: Some(PunishmentDuration::Permanent),
            },
            None,
        )
        .await
        .unwrap();

    eventually(|| async {
        net.cache
            .mutes_for(user_id)
            .await
            .first()
            .is_some_and(|mute| mute.punishment_id == revision.id())
    })
    .await;

    let mutes = net.cache.mutes_for(user_id).await;
    assert_eq!(mutes.len(), 1);
    assert_eq!(mutes[0].reason, "Advertising");
    assert!(mutes[0].duration.is_permanent());
}

/// Bans never reach the backend cache.
#[tokio::test]
async fn test_bans_are_not_synced() {
    let net = network();
    let user_id = Uuid::new_v4();

    net.service
        .issue(
            NewPunishment {
                user_id,
                kind: PunishmentKind::Ban,
                reason: "Cheating".to_string(),
                duration: PunishmentDuration::Permanent,
            },
            None,
        )
        .await
        .unwrap();
    net.service.issue(mute(user_id, "1h"), None).await.unwrap();

    eventually(|| async { net.cache.len().await == 1 }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.cache.len().await, 1);
}

/// Connecting announces ongoing mutes; disconnecting resets the user.
#[tokio::test]
async fn test_connect_and_disconnect() {
    let channel = Arc::new(LocalMuteChannel::new());
    let net = network_over(channel.clone());
    let user_id = Uuid::new_v4();

    net.service.issue(mute(user_id, "1d"), None).await.unwrap();
    eventually(|| async { net.cache.len().await == 1 }).await;

    let late_backend = BackendMuteCache::new();
    MuteSyncListener::new(late_backend.clone()).spawn(channel.subscribe());

    let sent = net.communicator.on_player_connect(user_id).await.unwrap();
    assert_eq!(sent, 1);
    eventually(|| async { late_backend.check_chat(user_id).await.is_blocked() }).await;

    net.communicator.on_player_disconnect(user_id);
    eventually(|| async { late_backend.is_empty().await && net.cache.is_empty().await }).await;
}

/// A player without mutes gets a RESET, clearing stale entries.
#[tokio::test]
async fn test_connect_without_mutes_resets() {
    let net = network();
    let user_id = Uuid::new_v4();

    let punishment = net.service.issue(mute(user_id, "1d"), None).await.unwrap();
    eventually(|| async { net.cache.len().await == 1 }).await;

    // Cancelled outside the service, so no REMOVE reaches the backend.
    net.service
        .registry()
        .store()
        .update_state(punishment.id(), PunishmentState::Cancelled, None)
        .await
        .unwrap();
    let mut cancelled = net.service.get(punishment.id()).await.unwrap();
    cancelled.cancel().unwrap();
    net.service.registry().put(cancelled).await;

    let sent = net.communicator.on_player_connect(user_id).await.unwrap();
    assert_eq!(sent, 1);
    eventually(|| async { net.cache.is_empty().await }).await;
}

struct FlakyChannel {
    inner: LocalMuteChannel,
    down: AtomicBool,
}

#[async_trait]
impl MuteChannel for FlakyChannel {
    async fn publish(&self, frame: Bytes) -> AppResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::Redis("connection refused".to_string()));
        }
        self.inner.publish(frame).await
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inner.subscribe()
    }
}

/// Frames that fail to publish are retried on the next connect.
#[tokio::test]
async fn test_failed_frames_are_retried() {
    let channel = Arc::new(FlakyChannel {
        inner: LocalMuteChannel::new(),
        down: AtomicBool::new(true),
    });
    let net = network_over(channel.clone());
    let user_id = Uuid::new_v4();

    net.service.issue(mute(user_id, "1h"), None).await.unwrap();
    eventually(|| async { net.communicator.pending_len().await == 1 }).await;
    assert!(net.cache.is_empty().await);

    channel.down.store(false, Ordering::SeqCst);
    assert_eq!(net.communicator.flush_pending().await, 1);
    eventually(|| async { net.cache.check_chat(user_id).await.is_blocked() }).await;
    assert_eq!(net.communicator.pending_len().await, 0);
}
