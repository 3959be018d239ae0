pub use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251110_090000_create_table_members::Migration),
            Box::new(m20251110_090100_create_table_users::Migration),
            Box::new(m20251110_090200_create_table_packages::Migration),
            Box::new(m20251110_090300_create_table_orders::Migration),
            Box::new(m20251110_090400_create_table_subscriptions::Migration),
            Box::new(m20251110_090500_create_table_check_ins::Migration),
            Box::new(m20251118_141500_create_table_notifications::Migration),
            Box::new(m20251118_141600_create_table_fcm_tokens::Migration),
        ]
    }
}

mod m20251110_090000_create_table_members;
mod m20251110_090100_create_table_users;
mod m20251110_090200_create_table_packages;
mod m20251110_090300_create_table_orders;
mod m20251110_090400_create_table_subscriptions;
mod m20251110_090500_create_table_check_ins;
mod m20251118_141500_create_table_notifications;
mod m20251118_141600_create_table_fcm_tokens;
