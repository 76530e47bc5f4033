//! Migration to create the retraining_jobs table.
//!
//! Each row is one retraining attempt. Status moves queued -> running -> a
//! terminal state exactly once; rollback only stamps reverted_at.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RetrainingJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RetrainingJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RetrainingJobs::ModelKey).text().not_null())
                    .col(ColumnDef::new(RetrainingJobs::Trigger).text().not_null())
                    .col(ColumnDef::new(RetrainingJobs::DriftCheckId).uuid().null())
                    .col(ColumnDef::new(RetrainingJobs::RequestedBy).text().null())
                    .col(
                        ColumnDef::new(RetrainingJobs::SourceModelVersion)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RetrainingJobs::NewModelVersion)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RetrainingJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(RetrainingJobs::OldMetrics)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RetrainingJobs::NewMetrics).json_binary().null())
                    .col(ColumnDef::new(RetrainingJobs::AccuracyDelta).double().null())
                    .col(ColumnDef::new(RetrainingJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(RetrainingJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RetrainingJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RetrainingJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RetrainingJobs::RevertedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(RetrainingJobs::RevertedBy).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_retraining_jobs_model_key")
                            .from(RetrainingJobs::Table, RetrainingJobs::ModelKey)
                            .to(Models::Table, Models::ModelKey)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_retraining_jobs_model_status")
                    .table(RetrainingJobs::Table)
                    .col(RetrainingJobs::ModelKey)
                    .col(RetrainingJobs::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_retraining_jobs_model_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(RetrainingJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RetrainingJobs {
    Table,
    Id,
    ModelKey,
    Trigger,
    DriftCheckId,
    RequestedBy,
    SourceModelVersion,
    NewModelVersion,
    Status,
    OldMetrics,
    NewMetrics,
    AccuracyDelta,
    ErrorMessage,
    CreatedAt,
    StartedAt,
    FinishedAt,
    RevertedAt,
    RevertedBy,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    ModelKey,
}
