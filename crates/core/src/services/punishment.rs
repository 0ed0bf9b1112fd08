//! Punishment service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_common::{AppError, AppResult, IdGenerator, PunishmentConfig};
use warden_db::entities::{LogAction, PunishmentKind, PunishmentState};

use crate::duration::PunishmentDuration;
use crate::events::{Dispatched, EventDispatcher, PunishmentEvent};
use crate::log::{DEFAULT_RESOLVE_TIMEOUT, PunishmentLog};
use crate::punishment::{NewPunishment, Punishment};
use crate::registry::PunishmentRegistry;
use crate::store::{PunishmentLogStore, PunishmentLookup, PunishmentStore, UserHandle, UserResolver};

/// Idle transition locks are dropped once this many are held.
const TRANSITION_LOCK_PRUNE_AT: usize = 1024;

/// Input for replacing an active punishment with a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeInput {
    /// Reason of the revision.
    pub reason: String,
    /// New duration. `None` keeps the current one.
    pub duration: Option<PunishmentDuration>,
}

/// Punishment service driving the state machine, events, persistence and logs.
///
/// Transitions of one punishment are serialized; transitions of different
/// punishments run concurrently. Listener failures never fail an operation;
/// they are logged at error level.
#[derive(Clone)]
pub struct PunishmentService {
    registry: Arc<PunishmentRegistry>,
    log_store: Arc<dyn PunishmentLogStore>,
    users: Arc<dyn UserResolver>,
    dispatcher: EventDispatcher,
    logs: Arc<RwLock<HashMap<Uuid, Arc<PunishmentLog>>>>,
    transitions: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    resolve_timeout: Duration,
    id_gen: IdGenerator,
}

impl PunishmentService {
    /// Create a new punishment service.
    #[must_use]
    pub fn new(
        store: Arc<dyn PunishmentStore>,
        log_store: Arc<dyn PunishmentLogStore>,
        users: Arc<dyn UserResolver>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            registry: Arc::new(PunishmentRegistry::new(store)),
            log_store,
            users,
            dispatcher,
            logs: Arc::new(RwLock::new(HashMap::new())),
            transitions: Arc::new(Mutex::new(HashMap::new())),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            id_gen: IdGenerator::new(),
        }
    }

    /// Apply engine settings.
    #[must_use]
    pub const fn with_config(mut self, config: &PunishmentConfig) -> Self {
        self.resolve_timeout = Duration::from_secs(config.resolve_timeout_secs);
        self
    }

    /// Dispatcher used for punishment events.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Arena of known revisions.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PunishmentRegistry> {
        &self.registry
    }

    /// Create a pending punishment. Nothing is persisted until it is punished.
    pub async fn create(&self, input: NewPunishment) -> Punishment {
        let punishment = Punishment::new(self.id_gen.generate(), input);
        self.registry.put(punishment.clone()).await;
        punishment
    }

    /// Create and immediately punish.
    pub async fn issue(
        &self,
        input: NewPunishment,
        actor: Option<UserHandle>,
    ) -> AppResult<Punishment> {
        let punishment = self.create(input).await;
        self.punish(punishment.id(), actor).await
    }

    /// Activate a pending punishment.
    ///
    /// The row is inserted before anything else happens. If that fails the
    /// punishment stays pending and no event is dispatched.
    pub async fn punish(&self, id: Uuid, actor: Option<UserHandle>) -> AppResult<Punishment> {
        let log = self.prepare(id).await?;
        let _guard = self.lock(id).await;

        let mut punishment = self.registry.require(id).await?;
        punishment.activate()?;
        self.registry.store().insert(punishment.to_model()).await?;
        self.registry.put(punishment.clone()).await;

        report_listener_error(
            &self.dispatcher.dispatch(PunishmentEvent::Issued {
                punishment: punishment.clone(),
            }),
            id,
        );
        self.append(
            log.as_deref(),
            &punishment,
            LogAction::Issue,
            "Punishment issued",
            actor,
        )
        .await;

        info!(
            punishment_id = %id,
            user_id = %punishment.user_id(),
            kind = ?punishment.kind(),
            "Punishment issued"
        );
        Ok(punishment)
    }

    /// Cancel an active punishment.
    ///
    /// Listeners of [`PunishmentEvent::Cancelled`] run before anything is
    /// committed and may veto with [`AppError::OperationCancelled`].
    pub async fn cancel(&self, id: Uuid, actor: Option<UserHandle>) -> AppResult<Punishment> {
        let log = self.prepare(id).await?;
        let _guard = self.lock(id).await;

        let mut punishment = self.registry.require(id).await?;
        self.expire_locked(&mut punishment, log.as_deref()).await;

        let mut cancelled = punishment.clone();
        cancelled.cancel()?;

        let dispatched = self
            .dispatcher
            .dispatch(PunishmentEvent::Cancelled { punishment });
        if dispatched.is_cancelled() {
            info!(punishment_id = %id, "Cancellation vetoed by a listener");
            return Err(AppError::OperationCancelled(format!(
                "cancellation of punishment {id}"
            )));
        }
        report_listener_error(&dispatched, id);

        self.registry
            .store()
            .update_state(id, PunishmentState::Cancelled, None)
            .await?;
        self.registry.put(cancelled.clone()).await;
        self.append(
            log.as_deref(),
            &cancelled,
            LogAction::Cancel,
            "Punishment cancelled",
            actor,
        )
        .await;

        info!(punishment_id = %id, "Punishment cancelled");
        Ok(cancelled)
    }

    /// Replace an active punishment with a new revision.
    ///
    /// Returns the new revision. The old one is superseded and links to it.
    /// Both rows are written in one store operation, so a failure leaves the
    /// old revision active and no new one behind.
    pub async fn change(
        &self,
        id: Uuid,
        input: ChangeInput,
        actor: Option<UserHandle>,
    ) -> AppResult<Punishment> {
        let log = self.prepare(id).await?;
        let _guard = self.lock(id).await;

        let mut old = self.registry.require(id).await?;
        self.expire_locked(&mut old, log.as_deref()).await;

        let new = old.revise(self.id_gen.generate(), input.reason, input.duration)?;
        let mut superseded = old.clone();
        superseded.supersede(new.id())?;

        let dispatched = self.dispatcher.dispatch(PunishmentEvent::Changed {
            old,
            new: new.clone(),
        });
        if dispatched.is_cancelled() {
            info!(punishment_id = %id, "Change vetoed by a listener");
            return Err(AppError::OperationCancelled(format!(
                "change of punishment {id}"
            )));
        }
        report_listener_error(&dispatched, id);

        self.registry.store().supersede(id, new.to_model()).await?;

        self.registry.put(superseded.clone()).await;
        self.registry.put(new.clone()).await;
        let new_log = self.log_handle(new.id()).await;
        self.append(
            log.as_deref(),
            &superseded,
            LogAction::Change,
            format!("Replaced by {}", new.id()),
            actor.clone(),
        )
        .await;
        self.append(
            Some(new_log.as_ref()),
            &new,
            LogAction::Change,
            format!("Replaces {id}"),
            actor,
        )
        .await;

        info!(punishment_id = %id, successor_id = %new.id(), "Punishment changed");
        Ok(new)
    }

    /// Whether the punishment is active and not elapsed.
    ///
    /// An active punishment whose duration elapsed is moved to EXPIRED here:
    /// the state change is persisted best-effort and an EXPIRE entry with no
    /// actor is appended to its log.
    pub async fn is_ongoing(&self, id: Uuid) -> AppResult<bool> {
        let punishment = self.registry.require(id).await?;
        if punishment.is_ongoing_at(Utc::now()) {
            return Ok(true);
        }
        if punishment.state() != PunishmentState::Active {
            return Ok(false);
        }

        let log = self.prepare(id).await?;
        let _guard = self.lock(id).await;
        let mut punishment = self.registry.require(id).await?;
        self.expire_locked(&mut punishment, log.as_deref()).await;
        Ok(punishment.is_ongoing_at(Utc::now()))
    }

    /// A punishment by id.
    pub async fn get(&self, id: Uuid) -> AppResult<Punishment> {
        self.registry.require(id).await
    }

    /// Every revision of the chain containing `id`, oldest first.
    pub async fn chain(&self, id: Uuid) -> AppResult<Vec<Punishment>> {
        self.registry.chain(id).await
    }

    /// Load every stored punishment of a player into memory.
    pub async fn load_user(&self, user_id: Uuid) -> AppResult<Vec<Punishment>> {
        let models = self.registry.store().find_by_user(user_id).await?;
        let mut punishments = Vec::with_capacity(models.len());
        for model in models {
            punishments.push(self.registry.adopt(Punishment::from(model)).await);
        }
        punishments.sort_by_key(Punishment::issued_at);
        Ok(punishments)
    }

    /// Ongoing punishments of a player with one of `kinds`.
    ///
    /// Elapsed punishments found on the way are expired.
    pub async fn ongoing_for_user(
        &self,
        user_id: Uuid,
        kinds: &[PunishmentKind],
    ) -> AppResult<Vec<Punishment>> {
        let mut ongoing = Vec::new();
        for punishment in self.load_user(user_id).await? {
            if punishment.state() != PunishmentState::Active
                || !kinds.contains(&punishment.kind())
            {
                continue;
            }
            if self.is_ongoing(punishment.id()).await? {
                ongoing.push(self.registry.require(punishment.id()).await?);
            }
        }
        Ok(ongoing)
    }

    /// Ongoing mutes of a player.
    pub async fn ongoing_mutes(&self, user_id: Uuid) -> AppResult<Vec<Punishment>> {
        self.ongoing_for_user(user_id, &[PunishmentKind::Mute, PunishmentKind::PermanentMute])
            .await
    }

    /// Expire every stored active punishment whose duration elapsed.
    ///
    /// Returns how many punishments were expired.
    pub async fn sweep_expired(&self) -> AppResult<usize> {
        let models = self
            .registry
            .store()
            .find_expired_active(Utc::now())
            .await?;

        let mut expired = 0;
        for model in models {
            let id = self.registry.adopt(Punishment::from(model)).await.id();
            let log = self.prepare(id).await?;
            let _guard = self.lock(id).await;
            let mut punishment = self.registry.require(id).await?;
            if self.expire_locked(&mut punishment, log.as_deref()).await {
                expired += 1;
            }
        }

        if expired > 0 {
            info!(expired, "Expired elapsed punishments");
        }
        Ok(expired)
    }

    /// Add a system note to the log of a punishment.
    pub async fn annotate(
        &self,
        id: Uuid,
        message: impl Into<String>,
        actor: Option<UserHandle>,
    ) -> AppResult<()> {
        let punishment = self.registry.require(id).await?;
        let log = self.log(id).await?;
        log.log(&punishment, LogAction::System, message, actor).await?;
        Ok(())
    }

    /// The log of a punishment, loaded from storage on first access.
    pub async fn log(&self, id: Uuid) -> AppResult<Arc<PunishmentLog>> {
        self.registry.require(id).await?;
        let log = self.log_handle(id).await;
        log.load(false).await?;
        Ok(log)
    }

    async fn log_handle(&self, id: Uuid) -> Arc<PunishmentLog> {
        let mut logs = self.logs.write().await;
        logs.entry(id)
            .or_insert_with(|| {
                let punishments: Arc<dyn PunishmentLookup> = self.registry.clone();
                Arc::new(
                    PunishmentLog::new(
                        id,
                        self.log_store.clone(),
                        self.users.clone(),
                        punishments,
                        self.dispatcher.clone(),
                    )
                    .with_resolve_timeout(self.resolve_timeout),
                )
            })
            .clone()
    }

    /// Check `id` exists and load its log before any transition lock is taken.
    ///
    /// A log that cannot be loaded is reported here and its entries for the
    /// coming transition are skipped.
    async fn prepare(&self, id: Uuid) -> AppResult<Option<Arc<PunishmentLog>>> {
        self.registry.require(id).await?;
        match self.log(id).await {
            Ok(log) => Ok(Some(log)),
            Err(e) => {
                error!(punishment_id = %id, error = %e, "Punishment log unavailable");
                Ok(None)
            }
        }
    }

    /// Serialize transitions of one punishment.
    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.transitions.lock().await;
            if locks.len() >= TRANSITION_LOCK_PRUNE_AT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Move an elapsed active punishment to EXPIRED. Caller holds its lock.
    async fn expire_locked(
        &self,
        punishment: &mut Punishment,
        log: Option<&PunishmentLog>,
    ) -> bool {
        if !punishment.expire_if_elapsed(Utc::now()) {
            return false;
        }

        let id = punishment.id();
        if let Err(e) = self
            .registry
            .store()
            .update_state(id, PunishmentState::Expired, None)
            .await
        {
            warn!(punishment_id = %id, error = %e, "Failed to persist expiry");
        }
        self.registry.put(punishment.clone()).await;
        self.append(log, punishment, LogAction::Expire, "Punishment expired", None)
            .await;

        debug!(punishment_id = %id, "Punishment expired");
        true
    }

    /// Append to the log after a committed transition. Failures are logged only.
    async fn append(
        &self,
        log: Option<&PunishmentLog>,
        punishment: &Punishment,
        action: LogAction,
        message: impl Into<String>,
        actor: Option<UserHandle>,
    ) {
        let Some(log) = log else {
            return;
        };
        if let Err(e) = log.log(punishment, action, message, actor).await {
            error!(
                punishment_id = %punishment.id(),
                action = ?action,
                error = %e,
                "Failed to append punishment log entry"
            );
        }
    }
}

fn report_listener_error(dispatched: &Dispatched, id: Uuid) {
    if let Some(error) = dispatched.error() {
        error!(punishment_id = %id, error = %error, "Punishment listener failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::store::InMemoryUserResolver;
    use crate::testing::{DelayedUserResolver, InMemoryPunishmentLogStore, InMemoryPunishmentStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<InMemoryPunishmentStore>,
        log_store: Arc<InMemoryPunishmentLogStore>,
        service: PunishmentService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryPunishmentStore::new());
        let log_store = Arc::new(InMemoryPunishmentLogStore::new());
        let service = PunishmentService::new(
            store.clone(),
            log_store.clone(),
            Arc::new(InMemoryUserResolver::new()),
            EventDispatcher::new(),
        );
        Fixture {
            store,
            log_store,
            service,
        }
    }

    fn mute(user_id: Uuid, duration: PunishmentDuration) -> NewPunishment {
        NewPunishment {
            user_id,
            kind: PunishmentKind::Mute,
            reason: "Spamming".to_string(),
            duration,
        }
    }

    fn moderator() -> Option<UserHandle> {
        Some(UserHandle::new(Uuid::new_v4(), "Moderator"))
    }

    #[tokio::test]
    async fn test_issue_persists_and_logs() {
        let f = fixture();
        let punishment = f
            .service
            .issue(
                mute(Uuid::new_v4(), PunishmentDuration::of_millis(600_000)),
                moderator(),
            )
            .await
            .unwrap();

        assert_eq!(punishment.state(), PunishmentState::Active);
        assert!(f.service.is_ongoing(punishment.id()).await.unwrap());

        let row = f.store.row(punishment.id()).await.unwrap();
        assert_eq!(row.state, PunishmentState::Active);

        let log = f.service.log(punishment.id()).await.unwrap();
        let issue = log.require_entry(LogAction::Issue).await.unwrap();
        assert_eq!(issue.sequence, 0);
        assert_eq!(issue.actor.map(|actor| actor.name), Some("Moderator".to_string()));
    }

    #[tokio::test]
    async fn test_punish_failure_stays_pending() {
        let f = fixture();
        let issued = Arc::new(AtomicUsize::new(0));
        let counter = issued.clone();
        f.service
            .dispatcher()
            .register(EventKind::Issued, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let pending = f
            .service
            .create(mute(Uuid::new_v4(), PunishmentDuration::Permanent))
            .await;
        f.store.fail_writes(true);

        let result = f.service.punish(pending.id(), moderator()).await;
        assert!(matches!(result, Err(AppError::Database(_))));

        let current = f.service.get(pending.id()).await.unwrap();
        assert_eq!(current.state(), PunishmentState::Pending);
        assert_eq!(issued.load(Ordering::SeqCst), 0);
        assert!(f.store.is_empty().await);
        assert!(f.service.log(pending.id()).await.unwrap().is_empty().await);
    }

    #[tokio::test]
    async fn test_double_cancel() {
        let f = fixture();
        let punishment = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), moderator())
            .await
            .unwrap();

        let cancelled = f.service.cancel(punishment.id(), moderator()).await.unwrap();
        assert_eq!(cancelled.state(), PunishmentState::Cancelled);

        let again = f.service.cancel(punishment.id(), moderator()).await;
        assert!(matches!(again, Err(AppError::IllegalStateTransition(_))));

        let log = f.service.log(punishment.id()).await.unwrap();
        assert_eq!(log.entries_for(LogAction::Cancel).await.len(), 1);
        assert_eq!(
            f.store.row(punishment.id()).await.unwrap().state,
            PunishmentState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_concurrent_cancel_commits_once() {
        let f = fixture();
        let punishment = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), None)
            .await
            .unwrap();

        let first = f.service.clone();
        let second = f.service.clone();
        let id = punishment.id();
        let (a, b) = tokio::join!(first.cancel(id, None), second.cancel(id, None));

        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    }

    #[tokio::test]
    async fn test_slow_log_does_not_block_other_punishments() {
        let f = fixture();
        let moderator = UserHandle::new(Uuid::new_v4(), "Moderator");
        let slow = f
            .service
            .issue(
                mute(Uuid::new_v4(), PunishmentDuration::Permanent),
                Some(moderator.clone()),
            )
            .await
            .unwrap();
        while f.log_store.rows_for(slow.id()).await.is_empty() {
            tokio::task::yield_now().await;
        }

        // A fresh node has to resolve the moderator before it can log.
        let restarted = PunishmentService::new(
            f.store.clone(),
            f.log_store.clone(),
            DelayedUserResolver::new(Duration::from_millis(500), [moderator]),
            EventDispatcher::new(),
        );
        let cancel = tokio::spawn({
            let service = restarted.clone();
            async move { service.cancel(slow.id(), None).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let other = tokio::time::timeout(
            Duration::from_millis(200),
            restarted.issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), None),
        )
        .await;
        assert!(other.is_ok_and(|issued| issued.is_ok()));

        let cancelled = cancel.await.unwrap().unwrap();
        let log = restarted.log(cancelled.id()).await.unwrap();
        let entry = log.require_entry(LogAction::Cancel).await.unwrap();
        assert_eq!(entry.sequence, 1);
    }

    #[tokio::test]
    async fn test_listener_error_does_not_fail_cancel() {
        let f = fixture();
        f.service
            .dispatcher()
            .register(EventKind::Cancelled, |_| Err(anyhow::anyhow!("listener broke")));

        let punishment = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), None)
            .await
            .unwrap();

        let cancelled = f.service.cancel(punishment.id(), None).await.unwrap();
        assert_eq!(cancelled.state(), PunishmentState::Cancelled);
        assert_eq!(
            f.store.row(punishment.id()).await.unwrap().state,
            PunishmentState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_vetoed_cancel_changes_nothing() {
        let f = fixture();
        f.service
            .dispatcher()
            .register(EventKind::Cancelled, |envelope| {
                envelope.cancel();
                Ok(())
            });

        let punishment = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), moderator())
            .await
            .unwrap();

        let result = f.service.cancel(punishment.id(), moderator()).await;
        assert!(matches!(result, Err(AppError::OperationCancelled(_))));

        assert_eq!(
            f.service.get(punishment.id()).await.unwrap().state(),
            PunishmentState::Active
        );
        assert_eq!(
            f.store.row(punishment.id()).await.unwrap().state,
            PunishmentState::Active
        );
        let log = f.service.log(punishment.id()).await.unwrap();
        assert!(log.entry(LogAction::Cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_vetoed_change_changes_nothing() {
        let f = fixture();
        f.service.dispatcher().register(EventKind::Changed, |envelope| {
            envelope.cancel();
            Ok(())
        });

        let punishment = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), None)
            .await
            .unwrap();
        let result = f
            .service
            .change(
                punishment.id(),
                ChangeInput {
                    reason: "Other".to_string(),
                    duration: None,
                },
                None,
            )
            .await;

        assert!(matches!(result, Err(AppError::OperationCancelled(_))));
        assert_eq!(f.store.len().await, 1);
        assert_eq!(f.service.chain(punishment.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_chain() {
        let f = fixture();
        let original = f
            .service
            .issue(
                mute(Uuid::new_v4(), PunishmentDuration::of_millis(600_000)),
                moderator(),
            )
            .await
            .unwrap();

        let mut current = original.clone();
        for round in 0..3 {
            current = f
                .service
                .change(
                    current.id(),
                    ChangeInput {
                        reason: format!("Revision {round}"),
                        duration: None,
                    },
                    moderator(),
                )
                .await
                .unwrap();
        }

        let chain = f.service.chain(original.id()).await.unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0].id(), original.id());
        assert_eq!(chain[3].id(), current.id());
        assert_eq!(chain[3].reason(), "Revision 2");

        for pair in chain.windows(2) {
            assert_eq!(pair[0].state(), PunishmentState::Superseded);
            assert_eq!(pair[0].successor(), Some(pair[1].id()));
            assert_eq!(pair[1].predecessor(), Some(pair[0].id()));
        }
        assert_eq!(chain[3].state(), PunishmentState::Active);
        assert_eq!(chain[3].duration(), original.duration());
        assert_eq!(f.store.len().await, 4);

        let newest_log = f.service.log(current.id()).await.unwrap();
        let entry = newest_log.require_entry(LogAction::Change).await.unwrap();
        assert_eq!(entry.predecessor, Some(chain[2].id()));
        assert_eq!(entry.successor, None);

        let oldest_log = f.service.log(original.id()).await.unwrap();
        let entry = oldest_log.require_entry(LogAction::Change).await.unwrap();
        assert_eq!(entry.successor, Some(chain[1].id()));
    }

    #[tokio::test]
    async fn test_failed_supersede_keeps_single_active_revision() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let original = f
            .service
            .issue(mute(user_id, PunishmentDuration::Permanent), moderator())
            .await
            .unwrap();

        f.store.fail_supersede(true);
        let result = f
            .service
            .change(
                original.id(),
                ChangeInput {
                    reason: "Escalated".to_string(),
                    duration: None,
                },
                moderator(),
            )
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));

        assert_eq!(f.store.len().await, 1);
        assert_eq!(
            f.store.row(original.id()).await.unwrap().state,
            PunishmentState::Active
        );
        assert_eq!(
            f.service.get(original.id()).await.unwrap().state(),
            PunishmentState::Active
        );
        let log = f.service.log(original.id()).await.unwrap();
        assert!(log.entry(LogAction::Change).await.is_none());

        let restarted = PunishmentService::new(
            f.store.clone(),
            f.log_store.clone(),
            Arc::new(InMemoryUserResolver::new()),
            EventDispatcher::new(),
        );
        let mutes = restarted.ongoing_mutes(user_id).await.unwrap();
        assert_eq!(mutes.len(), 1);
        assert_eq!(mutes[0].id(), original.id());
    }

    #[tokio::test]
    async fn test_change_superseded_fails() {
        let f = fixture();
        let original = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), None)
            .await
            .unwrap();
        let input = ChangeInput {
            reason: "Again".to_string(),
            duration: None,
        };
        f.service
            .change(original.id(), input.clone(), None)
            .await
            .unwrap();

        let result = f.service.change(original.id(), input, None).await;
        assert!(matches!(result, Err(AppError::IllegalStateTransition(_))));
    }

    #[tokio::test]
    async fn test_change_duration_rederives_kind() {
        let f = fixture();
        let original = f
            .service
            .issue(
                mute(Uuid::new_v4(), PunishmentDuration::of_millis(600_000)),
                None,
            )
            .await
            .unwrap();

        let revision = f
            .service
            .change(
                original.id(),
                ChangeInput {
                    reason: "Escalated".to_string(),
                    duration: Some(PunishmentDuration::Permanent),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(revision.kind(), PunishmentKind::PermanentMute);
        assert!(revision.duration().is_permanent());
    }

    #[tokio::test]
    async fn test_kick_expires_lazily() {
        let f = fixture();
        let kick = f
            .service
            .issue(
                NewPunishment {
                    user_id: Uuid::new_v4(),
                    kind: PunishmentKind::Kick,
                    reason: "Go away".to_string(),
                    duration: PunishmentDuration::Permanent,
                },
                moderator(),
            )
            .await
            .unwrap();

        assert!(!f.service.is_ongoing(kick.id()).await.unwrap());
        assert_eq!(
            f.service.get(kick.id()).await.unwrap().state(),
            PunishmentState::Expired
        );

        let log = f.service.log(kick.id()).await.unwrap();
        let expire = log.require_entry(LogAction::Expire).await.unwrap();
        assert!(expire.actor.is_none());
        assert_eq!(expire.sequence, 1);

        let result = f.service.cancel(kick.id(), moderator()).await;
        assert!(matches!(result, Err(AppError::IllegalStateTransition(_))));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let elapsed = f
            .service
            .issue(mute(user_id, PunishmentDuration::of_millis(0)), None)
            .await
            .unwrap();
        let ongoing = f
            .service
            .issue(mute(user_id, PunishmentDuration::of_millis(600_000)), None)
            .await
            .unwrap();

        assert_eq!(f.service.sweep_expired().await.unwrap(), 1);
        assert_eq!(
            f.store.row(elapsed.id()).await.unwrap().state,
            PunishmentState::Expired
        );
        assert_eq!(
            f.store.row(ongoing.id()).await.unwrap().state,
            PunishmentState::Active
        );
        assert_eq!(f.service.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ongoing_mutes_filters_kind_and_state() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let live = f
            .service
            .issue(mute(user_id, PunishmentDuration::Permanent), None)
            .await
            .unwrap();
        f.service
            .issue(mute(user_id, PunishmentDuration::of_millis(0)), None)
            .await
            .unwrap();
        f.service
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

        let mutes = f.service.ongoing_mutes(user_id).await.unwrap();
        assert_eq!(mutes.len(), 1);
        assert_eq!(mutes[0].id(), live.id());
    }

    #[tokio::test]
    async fn test_load_user_from_store() {
        let f = fixture();
        let user_id = Uuid::new_v4();
        let issued = f
            .service
            .issue(mute(user_id, PunishmentDuration::Permanent), None)
            .await
            .unwrap();

        let restarted = PunishmentService::new(
            f.store.clone(),
            f.log_store.clone(),
            Arc::new(InMemoryUserResolver::new()),
            EventDispatcher::new(),
        );
        let loaded = restarted.load_user(user_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), issued.id());
        assert_eq!(loaded[0].state(), PunishmentState::Active);
    }

    #[tokio::test]
    async fn test_annotate_appends_system_entry() {
        let f = fixture();
        let punishment = f
            .service
            .issue(mute(Uuid::new_v4(), PunishmentDuration::Permanent), None)
            .await
            .unwrap();

        f.service
            .annotate(punishment.id(), "Appeal rejected", moderator())
            .await
            .unwrap();

        let log = f.service.log(punishment.id()).await.unwrap();
        let latest = log.latest().await.unwrap();
        assert_eq!(latest.action, LogAction::System);
        assert_eq!(latest.message, "Appeal rejected");
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_punishment() {
        let f = fixture();
        let result = f.service.cancel(Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(AppError::PunishmentNotFound(_))));
        assert!(matches!(
            f.service.log(Uuid::new_v4()).await,
            Err(AppError::PunishmentNotFound(_))
        ));
    }
}
