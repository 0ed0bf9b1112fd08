//! Punishment log entity.

use super::punishment::PunishmentKind;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// What a log entry records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    #[sea_orm(string_value = "issue")]
    Issue,
    #[sea_orm(string_value = "change")]
    Change,
    #[sea_orm(string_value = "cancel")]
    Cancel,
    #[sea_orm(string_value = "expire")]
    Expire,
    #[sea_orm(string_value = "system")]
    System,
}

/// Punishment log model - one immutable audit record.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "punishment_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning punishment.
    pub punishment_id: Uuid,
    /// Position in the owning log, starting at 0.
    pub sequence: i32,
    /// Who performed the action (None = system).
    pub actor_id: Option<Uuid>,
    pub action: LogAction,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    /// Snapshot of the punished player.
    pub user_id: Uuid,
    /// Snapshot of the punishment kind.
    pub kind: PunishmentKind,
    /// Snapshot of the reason.
    #[sea_orm(column_type = "Text")]
    pub reason: String,
    /// Snapshot of the expiration (None = permanent).
    pub expires_at: Option<DateTimeWithTimeZone>,
    pub predecessor_id: Option<Uuid>,
    pub successor_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::punishment::Entity",
        from = "Column::PunishmentId",
        to = "super::punishment::Column::Id",
        on_delete = "Cascade"
    )]
    Punishment,
}

impl Related<super::punishment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Punishment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
