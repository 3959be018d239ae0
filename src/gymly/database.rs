pub mod check_ins;
pub mod fcm_tokens;
pub mod members;
pub mod notifications;
pub mod orders;
pub mod packages;
pub mod subscriptions;
pub mod users;

// Re-export entities for easier access
pub use check_ins::{ActiveModel as CheckInModel, CheckInStatus, Entity as CheckIns};
pub use fcm_tokens::{ActiveModel as FcmTokenModel, Entity as FcmTokens, Platform};
pub use members::{ActiveModel as MemberModel, Entity as Members, MemberStatus};
pub use notifications::{ActiveModel as NotificationModel, Entity as Notifications, NotificationType};
pub use orders::{ActiveModel as OrderModel, Entity as Orders, OrderStatus};
pub use packages::{ActiveModel as PackageModel, Entity as Packages};
pub use subscriptions::{ActiveModel as SubscriptionModel, Entity as Subscriptions};
pub use users::{ActiveModel as UserModel, Entity as Users, UserRole};

// Entity collection for convenience
pub mod entities {
    pub use super::{
        CheckInModel, CheckIns, FcmTokenModel, FcmTokens, MemberModel, Members, NotificationModel,
        Notifications, OrderModel, Orders, PackageModel, Packages, SubscriptionModel,
        Subscriptions, UserModel, Users,
    };
}
