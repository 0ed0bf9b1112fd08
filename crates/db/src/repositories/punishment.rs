//! Punishment repository.

use std::sync::Arc;

use crate::adapters::DialectAdapter;
use crate::entities::{Punishment, PunishmentState, punishment};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Statement, TransactionTrait, sea_query::Expr,
};
use uuid::Uuid;
use warden_common::{AppError, AppResult};

/// Punishment repository for database operations.
#[derive(Clone)]
pub struct PunishmentRepository {
    db: Arc<DatabaseConnection>,
}

impl PunishmentRepository {
    /// Create a new punishment repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a new punishment row. Fails on a duplicate id.
    pub async fn create(&self, model: punishment::Model) -> AppResult<()> {
        Punishment::insert(active_model(model))
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Supersede the active row `old_id` and insert its revision in one
    /// transaction.
    ///
    /// Either both writes land or neither does. Fails with
    /// [`AppError::IllegalStateTransition`] when `old_id` is not active.
    pub async fn supersede(&self, old_id: Uuid, revision: punishment::Model) -> AppResult<()> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = Punishment::update_many()
            .col_expr(
                punishment::Column::State,
                Expr::value(PunishmentState::Superseded),
            )
            .col_expr(punishment::Column::SuccessorId, Expr::value(revision.id))
            .col_expr(
                punishment::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(punishment::Column::Id.eq(old_id))
            .filter(punishment::Column::State.eq(PunishmentState::Active))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            txn.rollback()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Err(AppError::IllegalStateTransition(format!(
                "punishment {old_id} is not active"
            )));
        }

        if let Err(e) = Punishment::insert(active_model(revision))
            .exec_without_returning(&txn)
            .await
        {
            txn.rollback()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Err(AppError::Database(e.to_string()));
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record a state change, optionally linking the successor revision.
    pub async fn update_state(
        &self,
        id: Uuid,
        state: PunishmentState,
        successor_id: Option<Uuid>,
    ) -> AppResult<()> {
        let result = Punishment::update_many()
            .col_expr(punishment::Column::State, Expr::value(state))
            .col_expr(punishment::Column::SuccessorId, Expr::value(successor_id))
            .col_expr(
                punishment::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(punishment::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::PunishmentNotFound(id.to_string()));
        }

        Ok(())
    }

    /// Find a punishment by ID.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<punishment::Model>> {
        Punishment::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find several punishments at once. Missing ids are skipped.
    pub async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<punishment::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.db.get_database_backend();
        let adapter = DialectAdapter::new(backend);
        let sql = format!(
            "SELECT * FROM punishment WHERE id IN ({})",
            adapter.placeholders(1, ids.len())
        );
        let values = ids.iter().map(|id| adapter.uuid(*id)).collect::<Vec<_>>();

        Punishment::find()
            .from_raw_sql(Statement::from_sql_and_values(backend, sql, values))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All punishments of a player, oldest first.
    pub async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<punishment::Model>> {
        Punishment::find()
            .filter(punishment::Column::UserId.eq(user_id))
            .order_by_asc(punishment::Column::IssuedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active punishments whose expiration has passed.
    pub async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<punishment::Model>> {
        Punishment::find()
            .filter(punishment::Column::State.eq(PunishmentState::Active))
            .filter(punishment::Column::ExpiresAt.is_not_null())
            .filter(punishment::Column::ExpiresAt.lte(now))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

fn active_model(model: punishment::Model) -> punishment::ActiveModel {
    punishment::ActiveModel {
        id: Set(model.id),
        user_id: Set(model.user_id),
        kind: Set(model.kind),
        state: Set(model.state),
        reason: Set(model.reason),
        expires_at: Set(model.expires_at),
        predecessor_id: Set(model.predecessor_id),
        successor_id: Set(model.successor_id),
        issued_at: Set(model.issued_at),
        updated_at: Set(model.updated_at),
    }
}
