//! Per-punishment audit log.
//!
//! The in-memory list is the fast path: [`PunishmentLog::log`] appends before
//! returning and persists in the background. Storage catches up eventually;
//! [`PunishmentLog::load`] with `reload_if_present` reconciles memory with it.
//! A load never drops entries appended while it was running.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;
use warden_common::{AppError, AppResult};
use warden_db::entities::{LogAction, PunishmentKind, punishment_log};

use crate::duration::PunishmentDuration;
use crate::events::{EventDispatcher, PunishmentEvent};
use crate::punishment::Punishment;
use crate::store::{PunishmentLogStore, PunishmentLookup, UserHandle, UserResolver};

/// Default upper bound for resolving actors and punishments while loading.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentLogEntry {
    /// Position in the owning log, starting at 0. Unique per punishment.
    pub sequence: i32,
    /// Owning punishment, also the revision the entry describes.
    pub punishment_id: Uuid,
    /// Who acted. `None` for system actions.
    pub actor: Option<UserHandle>,
    /// What happened.
    pub action: LogAction,
    /// Free text.
    pub message: String,
    /// Punished player at the time of the action.
    pub user_id: Uuid,
    /// Punishment kind at the time of the action.
    pub kind: PunishmentKind,
    /// Reason at the time of the action.
    pub reason: String,
    /// Duration at the time of the action.
    pub duration: PunishmentDuration,
    /// Previous revision, if any.
    pub predecessor: Option<Uuid>,
    /// Next revision, if any.
    pub successor: Option<Uuid>,
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
}

impl PunishmentLogEntry {
    /// The revision this entry describes.
    #[must_use]
    pub const fn current(&self) -> Uuid {
        self.punishment_id
    }

    /// Whether no player performed the action.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.actor.is_none()
    }

    fn to_model(&self) -> punishment_log::Model {
        punishment_log::Model {
            id: 0,
            punishment_id: self.punishment_id,
            sequence: self.sequence,
            actor_id: self.actor.as_ref().map(|actor| actor.id),
            action: self.action,
            message: self.message.clone(),
            user_id: self.user_id,
            kind: self.kind,
            reason: self.reason.clone(),
            expires_at: self
                .duration
                .expiration_as_timestamp()
                .map(|at| at.fixed_offset()),
            predecessor_id: self.predecessor,
            successor_id: self.successor,
            created_at: self.timestamp.fixed_offset(),
        }
    }

    fn from_model(model: punishment_log::Model, actor: Option<UserHandle>) -> Self {
        let expiration = model.expires_at.map(|at| at.with_timezone(&Utc));
        Self {
            sequence: model.sequence,
            punishment_id: model.punishment_id,
            actor,
            action: model.action,
            message: model.message,
            user_id: model.user_id,
            kind: model.kind,
            reason: model.reason,
            duration: PunishmentDuration::from_timestamp(expiration),
            predecessor: model.predecessor_id,
            successor: model.successor_id,
            timestamp: model.created_at.with_timezone(&Utc),
        }
    }
}

/// Ordered audit trail of one punishment.
pub struct PunishmentLog {
    punishment_id: Uuid,
    entries: RwLock<Vec<PunishmentLogEntry>>,
    loading: Mutex<()>,
    store: Arc<dyn PunishmentLogStore>,
    users: Arc<dyn UserResolver>,
    punishments: Arc<dyn PunishmentLookup>,
    dispatcher: EventDispatcher,
    resolve_timeout: Duration,
}

impl PunishmentLog {
    /// Create an empty log for `punishment_id`.
    #[must_use]
    pub fn new(
        punishment_id: Uuid,
        store: Arc<dyn PunishmentLogStore>,
        users: Arc<dyn UserResolver>,
        punishments: Arc<dyn PunishmentLookup>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            punishment_id,
            entries: RwLock::new(Vec::new()),
            loading: Mutex::new(()),
            store,
            users,
            punishments,
            dispatcher,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Override the bound applied to lookups in [`PunishmentLog::load`].
    #[must_use]
    pub const fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// The owning punishment.
    #[must_use]
    pub const fn punishment_id(&self) -> Uuid {
        self.punishment_id
    }

    /// Merge the stored entries into memory.
    ///
    /// No-op when entries exist and `reload_if_present` is false. Loads run one
    /// at a time. Stored entries win over in-memory ones with the same
    /// sequence id; entries only held in memory (appended during the load, or
    /// not persisted yet) are kept. Actor and revision lookups are bounded;
    /// exceeding the bound fails with [`AppError::Timeout`] and leaves the
    /// current entries untouched.
    ///
    /// Appending to a log whose stored entries were never loaded reuses their
    /// sequence ids, so load before the first append.
    pub async fn load(&self, reload_if_present: bool) -> AppResult<()> {
        let _loading = self.loading.lock().await;
        if !reload_if_present && !self.entries.read().await.is_empty() {
            return Ok(());
        }

        let rows = self.store.find_by_punishment(self.punishment_id).await?;
        let actors = self.resolve_actors(&rows).await?;
        self.verify_links(&rows).await?;

        let mut merged: BTreeMap<i32, PunishmentLogEntry> = rows
            .into_iter()
            .map(|row| {
                let actor = row.actor_id.and_then(|id| actors.get(&id).cloned());
                (row.sequence, PunishmentLogEntry::from_model(row, actor))
            })
            .collect();
        let stored = merged.len();

        let mut entries = self.entries.write().await;
        for entry in entries.drain(..) {
            merged.entry(entry.sequence).or_insert(entry);
        }
        entries.extend(merged.into_values());

        debug!(
            punishment_id = %self.punishment_id,
            stored,
            entries = entries.len(),
            "Loaded punishment log"
        );
        Ok(())
    }

    async fn resolve_actors(
        &self,
        rows: &[punishment_log::Model],
    ) -> AppResult<HashMap<Uuid, UserHandle>> {
        let ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|row| row.actor_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let lookups = join_all(ids.iter().map(|id| self.users.find_by_id(*id)));
        let results = tokio::time::timeout(self.resolve_timeout, lookups)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "resolving actors of punishment {} took longer than {:?}",
                    self.punishment_id, self.resolve_timeout
                ))
            })?;

        let mut actors = HashMap::with_capacity(ids.len());
        for (id, result) in ids.into_iter().zip(results) {
            let actor = result?.unwrap_or_else(|| {
                debug!(actor_id = %id, "Log actor could not be resolved");
                UserHandle::unresolved(id)
            });
            actors.insert(id, actor);
        }
        Ok(actors)
    }

    async fn verify_links(&self, rows: &[punishment_log::Model]) -> AppResult<()> {
        let linked: Vec<Uuid> = rows
            .iter()
            .flat_map(|row| [row.predecessor_id, row.successor_id])
            .flatten()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if linked.is_empty() {
            return Ok(());
        }

        let found = tokio::time::timeout(
            self.resolve_timeout,
            self.punishments.find_punishments(&linked),
        )
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "resolving revisions of punishment {} took longer than {:?}",
                self.punishment_id, self.resolve_timeout
            ))
        })??;

        let found: HashSet<Uuid> = found.iter().map(Punishment::id).collect();
        match linked.into_iter().find(|id| !found.contains(id)) {
            Some(missing) => Err(AppError::PunishmentNotFound(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Append an entry describing `punishment` as it is now.
    ///
    /// The entry is visible to readers once this returns and
    /// [`PunishmentEvent::LogEntryCreated`] has been dispatched. Persistence
    /// runs on the runtime; its outcome is carried by the returned handle and
    /// logged on failure. A failed write does not remove the entry from memory.
    pub async fn log(
        &self,
        punishment: &Punishment,
        action: LogAction,
        message: impl Into<String>,
        actor: Option<UserHandle>,
    ) -> AppResult<JoinHandle<AppResult<()>>> {
        if punishment.id() != self.punishment_id {
            return Err(AppError::Internal(format!(
                "punishment {} cannot be logged in the log of {}",
                punishment.id(),
                self.punishment_id
            )));
        }

        let entry = {
            let mut entries = self.entries.write().await;
            let entry = PunishmentLogEntry {
                sequence: entries.last().map_or(0, |last| last.sequence + 1),
                punishment_id: self.punishment_id,
                actor,
                action,
                message: message.into(),
                user_id: punishment.user_id(),
                kind: punishment.kind(),
                reason: punishment.reason().to_string(),
                duration: punishment.duration(),
                predecessor: punishment.predecessor(),
                successor: punishment.successor(),
                timestamp: Utc::now(),
            };
            entries.push(entry.clone());
            entry
        };

        let model = entry.to_model();
        let dispatched = self
            .dispatcher
            .dispatch(PunishmentEvent::LogEntryCreated { entry });
        if let Some(error) = dispatched.error() {
            warn!(punishment_id = %self.punishment_id, error = %error, "Log entry listener failed");
        }

        let store = self.store.clone();
        Ok(tokio::spawn(async move {
            let result = store.append(model.clone()).await;
            if let Err(e) = &result {
                error!(
                    punishment_id = %model.punishment_id,
                    sequence = model.sequence,
                    error = %e,
                    "Failed to persist punishment log entry"
                );
            }
            result
        }))
    }

    /// Every entry in log order.
    pub async fn entries(&self) -> Vec<PunishmentLogEntry> {
        self.entries.read().await.clone()
    }

    /// Entries with the given action in log order.
    pub async fn entries_for(&self, action: LogAction) -> Vec<PunishmentLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.action == action)
            .cloned()
            .collect()
    }

    /// The first (oldest) entry with the given action.
    pub async fn entry(&self, action: LogAction) -> Option<PunishmentLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.action == action)
            .cloned()
    }

    /// Like [`PunishmentLog::entry`] but a missing entry is an error.
    pub async fn require_entry(&self, action: LogAction) -> AppResult<PunishmentLogEntry> {
        self.entry(action).await.ok_or_else(|| {
            AppError::NotFound(format!(
                "no {action:?} entry in the log of punishment {}",
                self.punishment_id
            ))
        })
    }

    /// The entry with the given sequence id.
    pub async fn entry_at(&self, sequence: i32) -> Option<PunishmentLogEntry> {
        let entries = self.entries.read().await;
        let index = entries
            .binary_search_by_key(&sequence, |entry| entry.sequence)
            .ok()?;
        entries.get(index).cloned()
    }

    /// The most recent entry.
    pub async fn latest(&self) -> Option<PunishmentLogEntry> {
        self.entries.read().await.last().cloned()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
