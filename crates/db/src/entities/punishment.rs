//! Punishment entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of sanction applied to a player.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    #[sea_orm(string_value = "kick")]
    Kick,
    #[sea_orm(string_value = "mute")]
    Mute,
    #[sea_orm(string_value = "permanent_mute")]
    PermanentMute,
    #[sea_orm(string_value = "ban")]
    Ban,
    #[sea_orm(string_value = "permanent_ban")]
    PermanentBan,
}

impl PunishmentKind {
    /// Whether this kind silences chat.
    #[must_use]
    pub const fn is_mute(self) -> bool {
        matches!(self, Self::Mute | Self::PermanentMute)
    }

    /// Whether this kind denies joining.
    #[must_use]
    pub const fn is_ban(self) -> bool {
        matches!(self, Self::Ban | Self::PermanentBan)
    }

    /// Whether this kind never expires.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::PermanentMute | Self::PermanentBan)
    }

    /// Kicks are one-shot and cannot be revised.
    #[must_use]
    pub const fn is_changeable(self) -> bool {
        !matches!(self, Self::Kick)
    }

    /// Whether a revision may turn `self` into `other`.
    #[must_use]
    pub const fn is_related(self, other: Self) -> bool {
        (self.is_mute() && other.is_mute()) || (self.is_ban() && other.is_ban())
    }

    /// The variant of the same family with the given permanence.
    #[must_use]
    pub const fn with_permanence(self, permanent: bool) -> Self {
        match (self, permanent) {
            (Self::Mute | Self::PermanentMute, true) => Self::PermanentMute,
            (Self::Mute | Self::PermanentMute, false) => Self::Mute,
            (Self::Ban | Self::PermanentBan, true) => Self::PermanentBan,
            (Self::Ban | Self::PermanentBan, false) => Self::Ban,
            (Self::Kick, _) => Self::Kick,
        }
    }
}

/// Lifecycle state of a punishment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PunishmentState {
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "superseded")]
    Superseded,
}

impl PunishmentState {
    /// Cancelled, expired and superseded punishments never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired | Self::Superseded)
    }
}

/// Punishment model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "punishment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// The punished player.
    pub user_id: Uuid,
    pub kind: PunishmentKind,
    pub state: PunishmentState,
    /// Reason shown to the player.
    #[sea_orm(column_type = "Text")]
    pub reason: String,
    /// When the punishment ends (None = permanent).
    pub expires_at: Option<DateTimeWithTimeZone>,
    /// The revision this one replaced.
    pub predecessor_id: Option<Uuid>,
    /// The revision that replaced this one.
    pub successor_id: Option<Uuid>,
    /// When the punishment was issued.
    pub issued_at: DateTimeWithTimeZone,
    /// Last state change.
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::punishment_log::Entity")]
    PunishmentLog,
}

impl Related<super::punishment_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PunishmentLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
