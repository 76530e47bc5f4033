//! Migration to create the client_datasets table.
//!
//! Production data accumulates here per model with a monotonically increasing
//! dataset_version; status tracks consumption by retraining attempts.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientDatasets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientDatasets::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClientDatasets::ModelKey).text().not_null())
                    .col(
                        ColumnDef::new(ClientDatasets::DatasetVersion)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientDatasets::RowCount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientDatasets::MeanConfidence)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ClientDatasets::StorageUri).text().not_null())
                    .col(
                        ColumnDef::new(ClientDatasets::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(ClientDatasets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ClientDatasets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_client_datasets_model_key")
                            .from(ClientDatasets::Table, ClientDatasets::ModelKey)
                            .to(Models::Table, Models::ModelKey)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_datasets_model_version")
                    .table(ClientDatasets::Table)
                    .col(ClientDatasets::ModelKey)
                    .col(ClientDatasets::DatasetVersion)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_datasets_model_status")
                    .table(ClientDatasets::Table)
                    .col(ClientDatasets::ModelKey)
                    .col(ClientDatasets::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_client_datasets_model_version")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_client_datasets_model_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ClientDatasets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ClientDatasets {
    Table,
    Id,
    ModelKey,
    DatasetVersion,
    RowCount,
    MeanConfidence,
    StorageUri,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    ModelKey,
}
