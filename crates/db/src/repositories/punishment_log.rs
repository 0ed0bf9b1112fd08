//! Punishment log repository.

use std::sync::Arc;

use crate::entities::{PunishmentLog, punishment_log};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;
use warden_common::{AppError, AppResult};

/// Punishment log repository for database operations.
#[derive(Clone)]
pub struct PunishmentLogRepository {
    db: Arc<DatabaseConnection>,
}

impl PunishmentLogRepository {
    /// Create a new punishment log repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append an entry. The row id is assigned by the database.
    pub async fn append(&self, model: punishment_log::Model) -> AppResult<()> {
        let active = punishment_log::ActiveModel {
            id: NotSet,
            punishment_id: Set(model.punishment_id),
            sequence: Set(model.sequence),
            actor_id: Set(model.actor_id),
            action: Set(model.action),
            message: Set(model.message),
            user_id: Set(model.user_id),
            kind: Set(model.kind),
            reason: Set(model.reason),
            expires_at: Set(model.expires_at),
            predecessor_id: Set(model.predecessor_id),
            successor_id: Set(model.successor_id),
            created_at: Set(model.created_at),
        };

        PunishmentLog::insert(active)
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// All entries of a punishment ordered by sequence.
    pub async fn find_by_punishment(
        &self,
        punishment_id: Uuid,
    ) -> AppResult<Vec<punishment_log::Model>> {
        PunishmentLog::find()
            .filter(punishment_log::Column::PunishmentId.eq(punishment_id))
            .order_by_asc(punishment_log::Column::Sequence)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
