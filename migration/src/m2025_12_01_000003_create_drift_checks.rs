//! Migration to create the drift_checks table.
//!
//! The unique (model_key, check_date) index makes the daily check idempotent:
//! a second insert for the same day fails instead of duplicating the row.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DriftChecks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DriftChecks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DriftChecks::ModelKey).text().not_null())
                    .col(ColumnDef::new(DriftChecks::CheckDate).date().not_null())
                    .col(ColumnDef::new(DriftChecks::PsiValue).double().not_null())
                    .col(ColumnDef::new(DriftChecks::JsDivergence).double().not_null())
                    .col(
                        ColumnDef::new(DriftChecks::DriftDetected)
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DriftChecks::ItemsAnalyzed)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DriftChecks::FeatureScores)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DriftChecks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_drift_checks_model_key")
                            .from(DriftChecks::Table, DriftChecks::ModelKey)
                            .to(Models::Table, Models::ModelKey)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_drift_checks_model_date")
                    .table(DriftChecks::Table)
                    .col(DriftChecks::ModelKey)
                    .col(DriftChecks::CheckDate)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_drift_checks_model_date").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DriftChecks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DriftChecks {
    Table,
    Id,
    ModelKey,
    CheckDate,
    PsiValue,
    JsDivergence,
    DriftDetected,
    ItemsAnalyzed,
    FeatureScores,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    ModelKey,
}
