use sea_orm_migration::{prelude::*, schema::*};

use super::m20251110_090100_create_table_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FcmTokens::Table)
                    .if_not_exists()
                    .col(pk_auto(FcmTokens::Id))
                    .col(integer(FcmTokens::UserId))
                    .col(string_uniq(FcmTokens::Token))
                    .col(string_null(FcmTokens::DeviceId))
                    .col(string_len_null(FcmTokens::Platform, 16))
                    .col(timestamp_with_time_zone(FcmTokens::CreatedAt))
                    .col(timestamp_with_time_zone(FcmTokens::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_fcm_tokens_user_id")
                            .from(FcmTokens::Table, FcmTokens::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("fcm_tokens_user_id_idx")
                    .table(FcmTokens::Table)
                    .col(FcmTokens::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("fcm_tokens_user_id_idx")
                    .table(FcmTokens::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(FcmTokens::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum FcmTokens {
    Table,
    Id,
    UserId,
    Token,
    DeviceId,
    Platform,
    CreatedAt,
    UpdatedAt,
}
