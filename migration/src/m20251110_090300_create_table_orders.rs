use sea_orm_migration::{prelude::*, schema::*};

use super::m20251110_090000_create_table_members::Members;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(pk_auto(Orders::Id))
                    .col(integer(Orders::MemberId))
                    .col(string(Orders::PackageName))
                    .col(integer(Orders::PackagePrice))
                    .col(integer(Orders::PackageDurationDays))
                    .col(integer(Orders::PaidAmount))
                    .col(string_null(Orders::ReceiptUrl))
                    .col(string_len(Orders::OrderStatus, 16).default("pending"))
                    .col(string_len_null(Orders::RejectionReason, 500))
                    .col(timestamp_with_time_zone(Orders::CreatedAt))
                    .col(timestamp_with_time_zone(Orders::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_member_id")
                            .from(Orders::Table, Orders::MemberId)
                            .to(Members::Table, Members::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("orders_order_status_idx")
                    .table(Orders::Table)
                    .col(Orders::OrderStatus)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("orders_order_status_idx")
                    .table(Orders::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Orders {
    Table,
    Id,
    MemberId,
    PackageName,
    PackagePrice,
    PackageDurationDays,
    PaidAmount,
    ReceiptUrl,
    OrderStatus,
    RejectionReason,
    CreatedAt,
    UpdatedAt,
}
