//! Migration to create the model_versions table.
//!
//! Versions are append-only; only the status column changes when a version is
//! archived on promotion or reactivated on rollback.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModelVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModelVersions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ModelVersions::ModelKey).text().not_null())
                    .col(ColumnDef::new(ModelVersions::Version).integer().not_null())
                    .col(
                        ColumnDef::new(ModelVersions::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(ModelVersions::Accuracy).double().not_null())
                    .col(ColumnDef::new(ModelVersions::Metrics).json_binary().not_null())
                    .col(
                        ColumnDef::new(ModelVersions::TrainingMetadata)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(ModelVersions::ArtifactUri).text().null())
                    .col(
                        ColumnDef::new(ModelVersions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_model_versions_model_key")
                            .from(ModelVersions::Table, ModelVersions::ModelKey)
                            .to(Models::Table, Models::ModelKey)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_model_versions_model_version")
                    .table(ModelVersions::Table)
                    .col(ModelVersions::ModelKey)
                    .col(ModelVersions::Version)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_model_versions_model_version")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ModelVersions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ModelVersions {
    Table,
    Id,
    ModelKey,
    Version,
    Status,
    Accuracy,
    Metrics,
    TrainingMetadata,
    ArtifactUri,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    ModelKey,
}
