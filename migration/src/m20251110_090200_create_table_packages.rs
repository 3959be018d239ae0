use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Packages::Table)
                    .if_not_exists()
                    .col(pk_auto(Packages::Id))
                    .col(string(Packages::Name))
                    .col(text_null(Packages::Description))
                    .col(integer(Packages::Price))
                    .col(integer(Packages::DurationDays))
                    .col(boolean(Packages::IsActive).default(true))
                    .col(timestamp_with_time_zone(Packages::CreatedAt))
                    .col(timestamp_with_time_zone(Packages::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("packages_is_active_price_idx")
                    .table(Packages::Table)
                    .col(Packages::IsActive)
                    .col(Packages::Price)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("packages_is_active_price_idx")
                    .table(Packages::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Packages::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Packages {
    Table,
    Id,
    Name,
    Description,
    Price,
    DurationDays,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
