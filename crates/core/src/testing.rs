//! In-memory collaborators for tests.
//!
//! Enabled for this crate's tests and for dependents through the `test-utils`
//! feature.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use warden_common::{AppError, AppResult};
use warden_db::entities::{PunishmentState, punishment, punishment_log};

use crate::store::{PunishmentLogStore, PunishmentStore, UserHandle, UserResolver};

/// Punishment rows kept in a map.
#[derive(Default)]
pub struct InMemoryPunishmentStore {
    rows: Mutex<HashMap<Uuid, punishment::Model>>,
    fail_writes: AtomicBool,
    fail_supersede: AtomicBool,
}

impl InMemoryPunishmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert and update fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only [`PunishmentStore::supersede`] fail.
    pub fn fail_supersede(&self, fail: bool) {
        self.fail_supersede.store(fail, Ordering::SeqCst);
    }

    /// A stored row.
    pub async fn row(&self, id: Uuid) -> Option<punishment::Model> {
        self.rows.lock().await.get(&id).cloned()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Whether the store holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PunishmentStore for InMemoryPunishmentStore {
    async fn insert(&self, model: punishment::Model) -> AppResult<()> {
        self.check_writable()?;
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&model.id) {
            return Err(AppError::Database(format!("duplicate key {}", model.id)));
        }
        rows.insert(model.id, model);
        Ok(())
    }

    async fn update_state(
        &self,
        id: Uuid,
        state: PunishmentState,
        successor_id: Option<Uuid>,
    ) -> AppResult<()> {
        self.check_writable()?;
        let mut rows = self.rows.lock().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| AppError::PunishmentNotFound(id.to_string()))?;
        row.state = state;
        row.successor_id = successor_id;
        row.updated_at = Utc::now().fixed_offset();
        Ok(())
    }

    async fn supersede(&self, old_id: Uuid, revision: punishment::Model) -> AppResult<()> {
        self.check_writable()?;
        if self.fail_supersede.load(Ordering::SeqCst) {
            return Err(AppError::Database("supersede failed".to_string()));
        }

        let mut rows = self.rows.lock().await;
        if rows.contains_key(&revision.id) {
            return Err(AppError::Database(format!("duplicate key {}", revision.id)));
        }
        let old = rows
            .get_mut(&old_id)
            .ok_or_else(|| AppError::PunishmentNotFound(old_id.to_string()))?;
        if old.state != PunishmentState::Active {
            return Err(AppError::IllegalStateTransition(format!(
                "punishment {old_id} is not active"
            )));
        }

        old.state = PunishmentState::Superseded;
        old.successor_id = Some(revision.id);
        old.updated_at = Utc::now().fixed_offset();
        rows.insert(revision.id, revision);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<punishment::Model>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<punishment::Model>> {
        let rows = self.rows.lock().await;
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<punishment::Model>> {
        let mut found: Vec<_> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|row| row.issued_at);
        Ok(found)
    }

    async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<punishment::Model>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|row| row.state == PunishmentState::Active)
            .filter(|row| row.expires_at.is_some_and(|at| at <= now))
            .cloned()
            .collect())
    }
}

/// Log rows kept in insertion order.
#[derive(Default)]
pub struct InMemoryPunishmentLogStore {
    rows: Mutex<Vec<punishment_log::Model>>,
    fail_writes: AtomicBool,
}

impl InMemoryPunishmentLogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored rows of one punishment in insertion order.
    pub async fn rows_for(&self, punishment_id: Uuid) -> Vec<punishment_log::Model> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|row| row.punishment_id == punishment_id)
            .cloned()
            .collect()
    }

    /// Store a row directly, bypassing the failure switch.
    pub async fn seed(&self, model: punishment_log::Model) {
        self.rows.lock().await.push(model);
    }
}

#[async_trait]
impl PunishmentLogStore for InMemoryPunishmentLogStore {
    async fn append(&self, model: punishment_log::Model) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("log store unavailable".to_string()));
        }
        let mut rows = self.rows.lock().await;
        let id = rows.len() as i64 + 1;
        rows.push(punishment_log::Model { id, ..model });
        Ok(())
    }

    async fn find_by_punishment(
        &self,
        punishment_id: Uuid,
    ) -> AppResult<Vec<punishment_log::Model>> {
        let mut rows = self.rows_for(punishment_id).await;
        rows.sort_by_key(|row| row.sequence);
        Ok(rows)
    }
}

/// User resolver that answers after a fixed delay.
pub struct DelayedUserResolver {
    delay: Duration,
    users: HashMap<Uuid, UserHandle>,
}

impl DelayedUserResolver {
    /// Resolve `users` after `delay`.
    #[must_use]
    pub fn new(delay: Duration, users: impl IntoIterator<Item = UserHandle>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            users: users.into_iter().map(|user| (user.id, user)).collect(),
        })
    }
}

#[async_trait]
impl UserResolver for DelayedUserResolver {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserHandle>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.users.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> AppResult<Option<UserHandle>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.users.values().find(|user| user.name == name).cloned())
    }
}
