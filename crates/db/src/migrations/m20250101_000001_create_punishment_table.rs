//! Create punishment table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Punishment::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Punishment::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Punishment::UserId).uuid().not_null())
                    .col(ColumnDef::new(Punishment::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(Punishment::State).string_len(32).not_null())
                    .col(ColumnDef::new(Punishment::Reason).text().not_null())
                    .col(ColumnDef::new(Punishment::ExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Punishment::PredecessorId).uuid())
                    .col(ColumnDef::new(Punishment::SuccessorId).uuid())
                    .col(
                        ColumnDef::new(Punishment::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Punishment::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (user_id, state) - ongoing punishments of a player
        manager
            .create_index(
                Index::create()
                    .name("idx_punishment_user_state")
                    .table(Punishment::Table)
                    .col(Punishment::UserId)
                    .col(Punishment::State)
                    .to_owned(),
            )
            .await?;

        // Index: expires_at (for expiry sweep)
        manager
            .create_index(
                Index::create()
                    .name("idx_punishment_expires_at")
                    .table(Punishment::Table)
                    .col(Punishment::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Punishment::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Punishment {
    Table,
    Id,
    UserId,
    Kind,
    State,
    Reason,
    ExpiresAt,
    PredecessorId,
    SuccessorId,
    IssuedAt,
    UpdatedAt,
}
