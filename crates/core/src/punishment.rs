//! Punishment entity and its state machine.
//!
//! ```text
//! PENDING -> ACTIVE -> CANCELLED
//!                   -> EXPIRED
//!                   -> SUPERSEDED (successor set)
//! ```
//!
//! Transition functions validate the current state and leave the value
//! untouched when they fail. Persistence and events are driven by
//! [`crate::PunishmentService`].

use chrono::{DateTime, Utc};
use uuid::Uuid;
use warden_common::{AppError, AppResult};
use warden_db::entities::{PunishmentKind, PunishmentState, punishment};

use crate::duration::PunishmentDuration;

/// Input for issuing a punishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPunishment {
    /// The player being punished.
    pub user_id: Uuid,
    /// Requested kind. Mutes and bans are adjusted to match the duration's permanence.
    pub kind: PunishmentKind,
    /// Reason shown to the player.
    pub reason: String,
    /// Requested duration. Ignored for kicks and permanent kinds.
    pub duration: PunishmentDuration,
}

/// One punishment revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Punishment {
    id: Uuid,
    user_id: Uuid,
    kind: PunishmentKind,
    reason: String,
    duration: PunishmentDuration,
    state: PunishmentState,
    predecessor: Option<Uuid>,
    successor: Option<Uuid>,
    issued_at: DateTime<Utc>,
}

impl Punishment {
    /// Create a pending punishment.
    #[must_use]
    pub fn new(id: Uuid, input: NewPunishment) -> Self {
        let issued_at = Utc::now();
        let (kind, duration) = normalize(input.kind, input.duration, issued_at);

        Self {
            id,
            user_id: input.user_id,
            kind,
            reason: input.reason,
            duration,
            state: PunishmentState::Pending,
            predecessor: None,
            successor: None,
            issued_at,
        }
    }

    /// Unique identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The punished player.
    #[must_use]
    pub const fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Kind of sanction.
    #[must_use]
    pub const fn kind(&self) -> PunishmentKind {
        self.kind
    }

    /// Reason shown to the player.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// How long the punishment lasts.
    #[must_use]
    pub const fn duration(&self) -> PunishmentDuration {
        self.duration
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PunishmentState {
        self.state
    }

    /// The revision this one replaced.
    #[must_use]
    pub const fn predecessor(&self) -> Option<Uuid> {
        self.predecessor
    }

    /// The revision that replaced this one.
    #[must_use]
    pub const fn successor(&self) -> Option<Uuid> {
        self.successor
    }

    /// When the punishment was issued.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Whether the punishment is active and its duration has not elapsed at `now`.
    ///
    /// Pure: an elapsed active punishment is reported as not ongoing but stays
    /// active until [`Punishment::expire_if_elapsed`] runs.
    #[must_use]
    pub fn is_ongoing_at(&self, now: DateTime<Utc>) -> bool {
        self.state == PunishmentState::Active && self.duration.is_ongoing_at(now)
    }

    /// PENDING -> ACTIVE.
    pub fn activate(&mut self) -> AppResult<()> {
        self.require(PunishmentState::Pending, "activate")?;
        self.state = PunishmentState::Active;
        Ok(())
    }

    /// ACTIVE -> CANCELLED.
    pub fn cancel(&mut self) -> AppResult<()> {
        self.require(PunishmentState::Active, "cancel")?;
        self.state = PunishmentState::Cancelled;
        Ok(())
    }

    /// ACTIVE -> SUPERSEDED, linking the successor revision.
    pub fn supersede(&mut self, successor: Uuid) -> AppResult<()> {
        self.require(PunishmentState::Active, "supersede")?;
        self.state = PunishmentState::Superseded;
        self.successor = Some(successor);
        Ok(())
    }

    /// ACTIVE -> EXPIRED when the duration elapsed at `now`.
    ///
    /// Returns whether the transition happened.
    pub fn expire_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != PunishmentState::Active || self.duration.is_ongoing_at(now) {
            return false;
        }
        self.state = PunishmentState::Expired;
        true
    }

    /// Build the active revision that replaces this punishment.
    ///
    /// Type, target and duration carry over unless a new duration is given.
    /// `self` is not modified; supersede it once the revision is committed.
    pub fn revise(
        &self,
        id: Uuid,
        reason: String,
        duration: Option<PunishmentDuration>,
    ) -> AppResult<Self> {
        self.require(PunishmentState::Active, "change")?;
        if !self.kind.is_changeable() {
            return Err(AppError::IllegalStateTransition(format!(
                "punishment {} of kind {:?} cannot be changed",
                self.id, self.kind
            )));
        }

        let issued_at = Utc::now();
        let (kind, duration) = match duration {
            Some(duration) => normalize(self.kind, duration, issued_at),
            None => (self.kind, self.duration),
        };

        Ok(Self {
            id,
            user_id: self.user_id,
            kind,
            reason,
            duration,
            state: PunishmentState::Active,
            predecessor: Some(self.id),
            successor: None,
            issued_at,
        })
    }

    /// Row representation.
    #[must_use]
    pub fn to_model(&self) -> punishment::Model {
        punishment::Model {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind,
            state: self.state,
            reason: self.reason.clone(),
            expires_at: self
                .duration
                .expiration_as_timestamp()
                .map(|at| at.fixed_offset()),
            predecessor_id: self.predecessor,
            successor_id: self.successor,
            issued_at: self.issued_at.fixed_offset(),
            updated_at: Utc::now().fixed_offset(),
        }
    }

    fn require(&self, expected: PunishmentState, operation: &str) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AppError::IllegalStateTransition(format!(
                "cannot {operation} punishment {} in state {:?}",
                self.id, self.state
            )))
        }
    }
}

impl From<punishment::Model> for Punishment {
    fn from(model: punishment::Model) -> Self {
        let expiration = model.expires_at.map(|at| at.with_timezone(&Utc));
        Self {
            id: model.id,
            user_id: model.user_id,
            kind: model.kind,
            reason: model.reason,
            duration: PunishmentDuration::from_timestamp(expiration),
            state: model.state,
            predecessor: model.predecessor_id,
            successor: model.successor_id,
            issued_at: model.issued_at.with_timezone(&Utc),
        }
    }
}

/// Permanent kinds carry permanent durations; kicks end the moment they are issued.
fn normalize(
    kind: PunishmentKind,
    duration: PunishmentDuration,
    now: DateTime<Utc>,
) -> (PunishmentKind, PunishmentDuration) {
    match kind {
        PunishmentKind::Kick => (kind, PunishmentDuration::Until(now)),
        _ if kind.is_permanent() => (kind, PunishmentDuration::Permanent),
        _ => (kind.with_permanence(duration.is_permanent()), duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(kind: PunishmentKind, duration: PunishmentDuration) -> Punishment {
        Punishment::new(
            Uuid::now_v7(),
            NewPunishment {
                user_id: Uuid::new_v4(),
                kind,
                reason: "Griefing".to_string(),
                duration,
            },
        )
    }

    fn active(kind: PunishmentKind, duration: PunishmentDuration) -> Punishment {
        let mut punishment = pending(kind, duration);
        punishment.activate().unwrap();
        punishment
    }

    #[test]
    fn test_new_punishment_is_pending() {
        let punishment = pending(PunishmentKind::Mute, PunishmentDuration::of_millis(60_000));
        assert_eq!(punishment.state(), PunishmentState::Pending);
        assert!(!punishment.is_ongoing_at(Utc::now()));
    }

    #[test]
    fn test_permanent_kinds_get_permanent_duration() {
        let punishment = pending(
            PunishmentKind::PermanentBan,
            PunishmentDuration::of_millis(1_000),
        );
        assert!(punishment.duration().is_permanent());
    }

    #[test]
    fn test_permanent_duration_upgrades_kind() {
        let punishment = pending(PunishmentKind::Mute, PunishmentDuration::Permanent);
        assert_eq!(punishment.kind(), PunishmentKind::PermanentMute);
    }

    #[test]
    fn test_kick_is_already_elapsed() {
        let mut kick = active(PunishmentKind::Kick, PunishmentDuration::Permanent);
        assert!(!kick.duration().is_permanent());
        assert!(kick.expire_if_elapsed(Utc::now()));
        assert_eq!(kick.state(), PunishmentState::Expired);
    }

    #[test]
    fn test_activate_twice_fails() {
        let mut punishment = active(PunishmentKind::Ban, PunishmentDuration::of_millis(60_000));
        let result = punishment.activate();
        assert!(matches!(result, Err(AppError::IllegalStateTransition(_))));
        assert_eq!(punishment.state(), PunishmentState::Active);
    }

    #[test]
    fn test_cancel_only_from_active() {
        let mut punishment = pending(PunishmentKind::Mute, PunishmentDuration::of_millis(60_000));
        assert!(punishment.cancel().is_err());
        assert_eq!(punishment.state(), PunishmentState::Pending);

        punishment.activate().unwrap();
        punishment.cancel().unwrap();
        assert_eq!(punishment.state(), PunishmentState::Cancelled);

        assert!(punishment.cancel().is_err());
        assert_eq!(punishment.state(), PunishmentState::Cancelled);
    }

    #[test]
    fn test_terminal_states_reject_every_transition() {
        let mut cancelled = active(PunishmentKind::Mute, PunishmentDuration::Permanent);
        cancelled.cancel().unwrap();
        let snapshot = cancelled.clone();

        assert!(cancelled.activate().is_err());
        assert!(cancelled.supersede(Uuid::new_v4()).is_err());
        assert!(!cancelled.expire_if_elapsed(Utc::now()));
        assert!(
            cancelled
                .revise(Uuid::new_v4(), "new".to_string(), None)
                .is_err()
        );
        assert_eq!(cancelled, snapshot);
    }

    #[test]
    fn test_expire_if_elapsed() {
        let mut ongoing = active(PunishmentKind::Mute, PunishmentDuration::of_millis(60_000));
        assert!(!ongoing.expire_if_elapsed(Utc::now()));
        assert!(ongoing.is_ongoing_at(Utc::now()));

        let mut elapsed = active(PunishmentKind::Mute, PunishmentDuration::of_millis(0));
        assert!(!elapsed.is_ongoing_at(Utc::now()));
        assert_eq!(elapsed.state(), PunishmentState::Active);
        assert!(elapsed.expire_if_elapsed(Utc::now()));
        assert_eq!(elapsed.state(), PunishmentState::Expired);
    }

    #[test]
    fn test_revise_links_predecessor() {
        let original = active(PunishmentKind::Mute, PunishmentDuration::of_millis(600_000));
        let revision = original
            .revise(Uuid::now_v7(), "Updated reason".to_string(), None)
            .unwrap();

        assert_eq!(revision.state(), PunishmentState::Active);
        assert_eq!(revision.predecessor(), Some(original.id()));
        assert_eq!(revision.user_id(), original.user_id());
        assert_eq!(revision.kind(), original.kind());
        assert_eq!(revision.duration(), original.duration());
        assert_eq!(revision.reason(), "Updated reason");
        assert_eq!(original.state(), PunishmentState::Active);
    }

    #[test]
    fn test_revise_with_permanent_duration_changes_kind() {
        let original = active(PunishmentKind::Ban, PunishmentDuration::of_millis(600_000));
        let revision = original
            .revise(
                Uuid::now_v7(),
                "Repeat offence".to_string(),
                Some(PunishmentDuration::Permanent),
            )
            .unwrap();

        assert_eq!(revision.kind(), PunishmentKind::PermanentBan);
        assert!(revision.duration().is_permanent());
    }

    #[test]
    fn test_kick_cannot_be_revised() {
        let kick = active(PunishmentKind::Kick, PunishmentDuration::Permanent);
        let result = kick.revise(Uuid::now_v7(), "again".to_string(), None);
        assert!(matches!(result, Err(AppError::IllegalStateTransition(_))));
    }

    #[test]
    fn test_supersede_sets_successor() {
        let mut punishment = active(PunishmentKind::Mute, PunishmentDuration::Permanent);
        let successor = Uuid::now_v7();
        punishment.supersede(successor).unwrap();

        assert_eq!(punishment.state(), PunishmentState::Superseded);
        assert_eq!(punishment.successor(), Some(successor));
    }

    #[test]
    fn test_model_round_trip_keeps_permanence() {
        let punishment = active(PunishmentKind::PermanentMute, PunishmentDuration::Permanent);
        let model = punishment.to_model();
        assert!(model.expires_at.is_none());

        let restored = Punishment::from(model);
        assert_eq!(restored.id(), punishment.id());
        assert!(restored.duration().is_permanent());
        assert_eq!(restored.state(), PunishmentState::Active);
    }
}
