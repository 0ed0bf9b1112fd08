//! Backend-side cache of active mutes.
//!
//! The cache is fed by mute sync messages and consulted on every chat
//! message. Expired entries are evicted when they are read, so no timer runs
//! per mute.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use warden_common::AppResult;
use warden_core::PunishmentDuration;

use crate::protocol::{MuteData, MuteDataKind};

/// One cached mute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMute {
    /// The muted player.
    pub user_id: Uuid,
    /// Punishment the entry mirrors.
    pub punishment_id: Uuid,
    /// Reason shown when chat is blocked.
    pub reason: String,
    /// When the mute ends.
    pub duration: PunishmentDuration,
}

/// Outcome of a chat check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDecision {
    /// The message may pass.
    Allowed,
    /// The message is blocked by a live mute.
    Blocked(CachedMute),
}

impl ChatDecision {
    /// Whether the message is blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Mutes known to this backend, grouped by player.
#[derive(Clone, Default)]
pub struct BackendMuteCache {
    entries: Arc<RwLock<HashMap<Uuid, Vec<CachedMute>>>>,
}

impl BackendMuteCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one sync message.
    ///
    /// Returns whether the cache changed. Replays are harmless: a second ADD
    /// replaces the first, and REMOVE or UPDATE for an unknown id do nothing.
    pub async fn apply(&self, data: &MuteData) -> AppResult<bool> {
        match data.kind {
            MuteDataKind::Add => {
                let mute = CachedMute {
                    user_id: data.uuid,
                    punishment_id: data.require_punishment_id()?,
                    reason: data.reason.clone().unwrap_or_default(),
                    duration: data.duration()?,
                };
                self.upsert(mute).await;
                Ok(true)
            }
            MuteDataKind::Remove => {
                let punishment_id = data.require_punishment_id()?;
                Ok(self.remove(punishment_id).await > 0)
            }
            MuteDataKind::Update => self.update(data).await,
            MuteDataKind::Reset => Ok(self.reset(data.uuid).await > 0),
            MuteDataKind::Unknown => {
                warn!(user_id = %data.uuid, "Ignoring mute data of unknown type");
                Ok(false)
            }
        }
    }

    async fn upsert(&self, mute: CachedMute) {
        let mut entries = self.entries.write().await;
        for bucket in entries.values_mut() {
            bucket.retain(|cached| cached.punishment_id != mute.punishment_id);
        }
        entries.retain(|_, bucket| !bucket.is_empty());

        debug!(user_id = %mute.user_id, punishment_id = %mute.punishment_id, "Cached mute");
        entries.entry(mute.user_id).or_default().push(mute);
    }

    async fn remove(&self, punishment_id: Uuid) -> usize {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for bucket in entries.values_mut() {
            let before = bucket.len();
            bucket.retain(|cached| cached.punishment_id != punishment_id);
            removed += before - bucket.len();
        }
        entries.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Rewrite the entry of `punishment_id`, or of its predecessor when the
    /// revision is not cached yet. Leaves at most one entry per punishment.
    async fn update(&self, data: &MuteData) -> AppResult<bool> {
        let punishment_id = data.require_punishment_id()?;
        let reason = data.reason.clone().unwrap_or_default();
        let duration = data.duration()?;
        let is_target = |cached: &CachedMute| {
            cached.punishment_id == punishment_id
                || data.predecessor_id == Some(cached.punishment_id)
        };

        let mut entries = self.entries.write().await;
        let mut matched: Vec<CachedMute> = Vec::new();
        for bucket in entries.values_mut() {
            let (hit, keep): (Vec<_>, Vec<_>) =
                bucket.drain(..).partition(|cached| is_target(cached));
            *bucket = keep;
            matched.extend(hit);
        }
        entries.retain(|_, bucket| !bucket.is_empty());

        let Some(user_id) = matched
            .iter()
            .find(|cached| cached.punishment_id == punishment_id)
            .or_else(|| matched.first())
            .map(|cached| cached.user_id)
        else {
            warn!(
                user_id = %data.uuid,
                punishment_id = %punishment_id,
                "Dropping update for a mute this backend does not know"
            );
            return Ok(false);
        };

        debug!(
            user_id = %user_id,
            punishment_id = %punishment_id,
            replaced = matched.len(),
            "Updated cached mute"
        );
        entries.entry(user_id).or_default().push(CachedMute {
            user_id,
            punishment_id,
            reason,
            duration,
        });
        Ok(true)
    }

    async fn reset(&self, user_id: Uuid) -> usize {
        self.entries
            .write()
            .await
            .remove(&user_id)
            .map_or(0, |bucket| bucket.len())
    }

    /// Decide whether a chat message of `user_id` passes.
    pub async fn check_chat(&self, user_id: Uuid) -> ChatDecision {
        self.check_chat_at(user_id, Utc::now()).await
    }

    /// [`BackendMuteCache::check_chat`] against a fixed clock.
    ///
    /// Entries are walked soonest-expiring first. Expired entries are evicted
    /// on the way and the first live one blocks.
    pub async fn check_chat_at(&self, user_id: Uuid, now: DateTime<Utc>) -> ChatDecision {
        let mut entries = self.entries.write().await;
        let Some(bucket) = entries.get_mut(&user_id) else {
            return ChatDecision::Allowed;
        };

        bucket.sort_by_key(|cached| cached.duration);
        let before = bucket.len();
        bucket.retain(|cached| cached.duration.is_ongoing_at(now));
        if bucket.len() < before {
            debug!(user_id = %user_id, evicted = before - bucket.len(), "Evicted expired mutes");
        }

        match bucket.first().cloned() {
            Some(mute) => ChatDecision::Blocked(mute),
            None => {
                entries.remove(&user_id);
                ChatDecision::Allowed
            }
        }
    }

    /// Cached mutes of a player, expired ones included.
    pub async fn mutes_for(&self, user_id: Uuid) -> Vec<CachedMute> {
        self.entries
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of cached mutes.
    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(Vec::len).sum()
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
