//! Arena of punishment revisions keyed by id.
//!
//! Revision chains refer to each other by id only. The registry resolves ids
//! lazily, first from memory and then from the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use warden_common::{AppError, AppResult};

use crate::punishment::Punishment;
use crate::store::{PunishmentLookup, PunishmentStore};

/// In-memory view of known punishments backed by a [`PunishmentStore`].
pub struct PunishmentRegistry {
    arena: RwLock<HashMap<Uuid, Punishment>>,
    store: Arc<dyn PunishmentStore>,
}

impl PunishmentRegistry {
    /// Create an empty registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PunishmentStore>) -> Self {
        Self {
            arena: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PunishmentStore> {
        &self.store
    }

    /// A cached punishment, without touching the store.
    pub async fn cached(&self, id: Uuid) -> Option<Punishment> {
        self.arena.read().await.get(&id).cloned()
    }

    /// Store or replace a revision in memory.
    pub async fn put(&self, punishment: Punishment) {
        self.arena.write().await.insert(punishment.id(), punishment);
    }

    /// Cache a revision read from storage unless memory already has it.
    ///
    /// Memory wins since storage writes may lag behind.
    pub async fn adopt(&self, punishment: Punishment) -> Punishment {
        self.arena
            .write()
            .await
            .entry(punishment.id())
            .or_insert(punishment)
            .clone()
    }

    /// Resolve from memory, falling back to the store.
    pub async fn fetch(&self, id: Uuid) -> AppResult<Option<Punishment>> {
        if let Some(punishment) = self.cached(id).await {
            return Ok(Some(punishment));
        }

        match self.store.find_by_id(id).await? {
            Some(model) => Ok(Some(self.adopt(Punishment::from(model)).await)),
            None => Ok(None),
        }
    }

    /// Like [`PunishmentRegistry::fetch`] but a missing punishment is an error.
    pub async fn require(&self, id: Uuid) -> AppResult<Punishment> {
        self.fetch(id)
            .await?
            .ok_or_else(|| AppError::PunishmentNotFound(id.to_string()))
    }

    /// Ids of cached punishments matching `predicate`.
    pub async fn select<F>(&self, predicate: F) -> Vec<Uuid>
    where
        F: Fn(&Punishment) -> bool,
    {
        self.arena
            .read()
            .await
            .values()
            .filter(|punishment| predicate(punishment))
            .map(Punishment::id)
            .collect()
    }

    /// The full revision chain containing `id`, oldest first.
    pub async fn chain(&self, id: Uuid) -> AppResult<Vec<Punishment>> {
        let mut visited = HashSet::new();
        let mut root = self.require(id).await?;
        visited.insert(root.id());

        while let Some(predecessor) = root.predecessor() {
            if !visited.insert(predecessor) {
                return Err(AppError::Internal(format!(
                    "revision chain of {id} contains a cycle"
                )));
            }
            root = self.require(predecessor).await?;
        }

        let mut chain = vec![root];
        visited.clear();
        while let Some(successor) = chain.last().and_then(Punishment::successor) {
            if !visited.insert(successor) {
                return Err(AppError::Internal(format!(
                    "revision chain of {id} contains a cycle"
                )));
            }
            chain.push(self.require(successor).await?);
        }

        Ok(chain)
    }
}

#[async_trait]
impl PunishmentLookup for PunishmentRegistry {
    async fn find_punishment(&self, id: Uuid) -> AppResult<Option<Punishment>> {
        self.fetch(id).await
    }

    async fn find_punishments(&self, ids: &[Uuid]) -> AppResult<Vec<Punishment>> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        {
            let arena = self.arena.read().await;
            for id in ids {
                match arena.get(id) {
                    Some(punishment) => found.push(punishment.clone()),
                    None => missing.push(*id),
                }
            }
        }

        for model in self.store.find_many(&missing).await? {
            found.push(self.adopt(Punishment::from(model)).await);
        }

        Ok(found)
    }
}
