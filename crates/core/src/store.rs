//! Collaborator interfaces.
//!
//! The punishment engine depends on storage and user lookups only through the
//! traits in this module. The `warden-db` repositories implement the storage
//! traits; tests use the in-memory versions from [`crate::testing`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use warden_common::AppResult;
use warden_db::{
    entities::{PunishmentState, punishment, punishment_log},
    repositories::{PunishmentLogRepository, PunishmentRepository},
};

use crate::punishment::Punishment;

/// A resolved player.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserHandle {
    /// Player id.
    pub id: Uuid,
    /// Last known name.
    pub name: String,
}

impl UserHandle {
    /// Create a handle.
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Handle for an id the resolver does not know. The name is the id itself.
    #[must_use]
    pub fn unresolved(id: Uuid) -> Self {
        Self {
            id,
            name: id.to_string(),
        }
    }
}

/// Row store for punishments.
#[async_trait]
pub trait PunishmentStore: Send + Sync {
    /// Insert a new row. Fails on a duplicate id.
    async fn insert(&self, model: punishment::Model) -> AppResult<()>;

    /// Record a state change and optionally the successor link.
    async fn update_state(
        &self,
        id: Uuid,
        state: PunishmentState,
        successor_id: Option<Uuid>,
    ) -> AppResult<()>;

    /// Atomically mark the active row `old_id` superseded by `revision` and
    /// insert `revision`. On error neither write is visible.
    async fn supersede(&self, old_id: Uuid, revision: punishment::Model) -> AppResult<()>;

    /// Point lookup.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<punishment::Model>>;

    /// Batch lookup. Missing ids are skipped.
    async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<punishment::Model>>;

    /// Every punishment of a player.
    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<punishment::Model>>;

    /// Active rows whose expiration passed.
    async fn find_expired_active(&self, now: DateTime<Utc>)
    -> AppResult<Vec<punishment::Model>>;
}

/// Row store for log entries.
#[async_trait]
pub trait PunishmentLogStore: Send + Sync {
    /// Append one entry.
    async fn append(&self, model: punishment_log::Model) -> AppResult<()>;

    /// Entries of one punishment ordered by sequence.
    async fn find_by_punishment(&self, punishment_id: Uuid)
    -> AppResult<Vec<punishment_log::Model>>;
}

/// Resolves players from an external profile source.
///
/// Unknown players are `Ok(None)`, not an error.
#[async_trait]
pub trait UserResolver: Send + Sync {
    /// Resolve by id.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserHandle>>;

    /// Resolve by name.
    async fn find_by_name(&self, name: &str) -> AppResult<Option<UserHandle>>;
}

/// Resolves punishment references found in log entries.
#[async_trait]
pub trait PunishmentLookup: Send + Sync {
    /// Resolve one punishment.
    async fn find_punishment(&self, id: Uuid) -> AppResult<Option<Punishment>>;

    /// Resolve several punishments. Missing ids are skipped.
    async fn find_punishments(&self, ids: &[Uuid]) -> AppResult<Vec<Punishment>>;
}

#[async_trait]
impl PunishmentStore for PunishmentRepository {
    async fn insert(&self, model: punishment::Model) -> AppResult<()> {
        self.create(model).await
    }

    async fn update_state(
        &self,
        id: Uuid,
        state: PunishmentState,
        successor_id: Option<Uuid>,
    ) -> AppResult<()> {
        Self::update_state(self, id, state, successor_id).await
    }

    async fn supersede(&self, old_id: Uuid, revision: punishment::Model) -> AppResult<()> {
        Self::supersede(self, old_id, revision).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<punishment::Model>> {
        Self::find_by_id(self, id).await
    }

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<punishment::Model>> {
        Self::find_many(self, ids).await
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<punishment::Model>> {
        Self::find_by_user(self, user_id).await
    }

    async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<punishment::Model>> {
        Self::find_expired_active(self, now).await
    }
}

#[async_trait]
impl PunishmentLogStore for PunishmentLogRepository {
    async fn append(&self, model: punishment_log::Model) -> AppResult<()> {
        Self::append(self, model).await
    }

    async fn find_by_punishment(
        &self,
        punishment_id: Uuid,
    ) -> AppResult<Vec<punishment_log::Model>> {
        Self::find_by_punishment(self, punishment_id).await
    }
}

/// Players seen by this node, fed by connection events.
#[derive(Clone, Default)]
pub struct InMemoryUserResolver {
    users: Arc<RwLock<HashMap<Uuid, UserHandle>>>,
}

impl InMemoryUserResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a player, replacing a previous name.
    pub async fn remember(&self, user: UserHandle) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserResolver for InMemoryUserResolver {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserHandle>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> AppResult<Option<UserHandle>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.name.eq_ignore_ascii_case(name))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_resolver() {
        let resolver = InMemoryUserResolver::new();
        let id = Uuid::new_v4();
        resolver.remember(UserHandle::new(id, "Steve")).await;

        assert_eq!(
            resolver.find_by_id(id).await.unwrap().map(|u| u.name),
            Some("Steve".to_string())
        );
        assert_eq!(
            resolver.find_by_name("steve").await.unwrap().map(|u| u.id),
            Some(id)
        );
        assert!(resolver.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remember_replaces_name() {
        let resolver = InMemoryUserResolver::new();
        let id = Uuid::new_v4();
        resolver.remember(UserHandle::new(id, "Alex")).await;
        resolver.remember(UserHandle::new(id, "Alexandra")).await;

        assert!(resolver.find_by_name("Alex").await.unwrap().is_none());
        assert!(resolver.find_by_name("Alexandra").await.unwrap().is_some());
    }
}
