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
                    .table(CheckIns::Table)
                    .if_not_exists()
                    .col(pk_auto(CheckIns::Id))
                    .col(integer(CheckIns::MemberId))
                    .col(string_len(CheckIns::Status, 16))
                    .col(string_null(CheckIns::Reason))
                    .col(timestamp_with_time_zone(CheckIns::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_check_ins_member_id")
                            .from(CheckIns::Table, CheckIns::MemberId)
                            .to(Members::Table, Members::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("check_ins_member_id_created_at_idx")
                    .table(CheckIns::Table)
                    .col(CheckIns::MemberId)
                    .col(CheckIns::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("check_ins_member_id_created_at_idx")
                    .table(CheckIns::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CheckIns::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum CheckIns {
    Table,
    Id,
    MemberId,
    Status,
    Reason,
    CreatedAt,
}
