//! Migration to create the alerts table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alerts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Alerts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Alerts::ModelKey).text().not_null())
                    .col(ColumnDef::new(Alerts::AlertType).text().not_null())
                    .col(ColumnDef::new(Alerts::Severity).text().not_null())
                    .col(ColumnDef::new(Alerts::Title).text().not_null())
                    .col(ColumnDef::new(Alerts::Details).json_binary().not_null())
                    .col(
                        ColumnDef::new(Alerts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Alerts::DismissedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Alerts::DismissedBy).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alerts_model_created")
                    .table(Alerts::Table)
                    .col(Alerts::ModelKey)
                    .col(Alerts::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_alerts_model_created").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Alerts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Alerts {
    Table,
    Id,
    ModelKey,
    AlertType,
    Severity,
    Title,
    Details,
    CreatedAt,
    DismissedAt,
    DismissedBy,
}
