use sea_orm_migration::{prelude::*, schema::*};

use super::{
    m20251110_090000_create_table_members::Members, m20251110_090300_create_table_orders::Orders,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(pk_auto(Subscriptions::Id))
                    .col(integer(Subscriptions::MemberId))
                    .col(integer_uniq(Subscriptions::OrderId))
                    .col(timestamp_with_time_zone_null(Subscriptions::StartDate))
                    .col(timestamp_with_time_zone_null(Subscriptions::EndDate))
                    .col(timestamp_with_time_zone(Subscriptions::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_member_id")
                            .from(Subscriptions::Table, Subscriptions::MemberId)
                            .to(Members::Table, Members::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_order_id")
                            .from(Subscriptions::Table, Subscriptions::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // check-in lookups filter by member and sort by the end of the window
        manager
            .create_index(
                Index::create()
                    .name("subscriptions_member_id_end_date_idx")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::MemberId)
                    .col(Subscriptions::EndDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("subscriptions_member_id_end_date_idx")
                    .table(Subscriptions::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    MemberId,
    OrderId,
    StartDate,
    EndDate,
    CreatedAt,
}
