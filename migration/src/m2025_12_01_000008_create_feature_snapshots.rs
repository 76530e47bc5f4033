//! Migration to create the feature_snapshots table.
//!
//! Holds the fitted input transformers per (model_key, version). Rows are
//! content-addressed by a sha256 of the canonical payload and never updated.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FeatureSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FeatureSnapshots::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FeatureSnapshots::ModelKey).text().not_null())
                    .col(ColumnDef::new(FeatureSnapshots::Version).integer().not_null())
                    .col(
                        ColumnDef::new(FeatureSnapshots::ContentHash)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FeatureSnapshots::FeatureNames)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FeatureSnapshots::FeatureKinds)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FeatureSnapshots::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FeatureSnapshots::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_feature_snapshots_model_version")
                    .table(FeatureSnapshots::Table)
                    .col(FeatureSnapshots::ModelKey)
                    .col(FeatureSnapshots::Version)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_feature_snapshots_model_version")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(FeatureSnapshots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FeatureSnapshots {
    Table,
    Id,
    ModelKey,
    Version,
    ContentHash,
    FeatureNames,
    FeatureKinds,
    Payload,
    CreatedAt,
}
