//! Create punishment log table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PunishmentLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PunishmentLog::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PunishmentLog::PunishmentId).uuid().not_null())
                    .col(ColumnDef::new(PunishmentLog::Sequence).integer().not_null())
                    .col(ColumnDef::new(PunishmentLog::ActorId).uuid())
                    .col(ColumnDef::new(PunishmentLog::Action).string_len(32).not_null())
                    .col(ColumnDef::new(PunishmentLog::Message).text().not_null())
                    .col(ColumnDef::new(PunishmentLog::UserId).uuid().not_null())
                    .col(ColumnDef::new(PunishmentLog::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(PunishmentLog::Reason).text().not_null())
                    .col(ColumnDef::new(PunishmentLog::ExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(PunishmentLog::PredecessorId).uuid())
                    .col(ColumnDef::new(PunishmentLog::SuccessorId).uuid())
                    .col(
                        ColumnDef::new(PunishmentLog::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_punishment_log_punishment")
                            .from(PunishmentLog::Table, PunishmentLog::PunishmentId)
                            .to(Punishment::Table, Punishment::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (punishment_id, sequence) - entries are never reordered
        manager
            .create_index(
                Index::create()
                    .name("idx_punishment_log_sequence")
                    .table(PunishmentLog::Table)
                    .col(PunishmentLog::PunishmentId)
                    .col(PunishmentLog::Sequence)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PunishmentLog::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PunishmentLog {
    Table,
    Id,
    PunishmentId,
    Sequence,
    ActorId,
    Action,
    Message,
    UserId,
    Kind,
    Reason,
    ExpiresAt,
    PredecessorId,
    SuccessorId,
    CreatedAt,
}

#[derive(Iden)]
enum Punishment {
    Table,
    Id,
}
