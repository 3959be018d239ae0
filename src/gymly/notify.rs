use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
};
use serde_json::Value;
use std::collections::HashMap;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use super::{
    database::{
        NotificationType, UserRole,
        entities::{FcmTokens, NotificationModel, Users},
        fcm_tokens, notifications, users,
    },
    error::GymlyResult,
    push::{PushMessage, PushSender},
};

/// What gets written to the inbox and pushed to every device of the recipient.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    pub data: Option<Value>,
}

impl Notice {
    pub fn new(kind: NotificationType, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn push_message(&self) -> PushMessage {
        PushMessage {
            title: self.title.clone(),
            body: self.body.clone(),
            data: stringify_data(self.data.as_ref()),
        }
    }
}

/* FCM data payloads only carry string values. */
pub fn stringify_data(data: Option<&Value>) -> HashMap<String, String> {
    let Some(Value::Object(map)) = data else {
        return HashMap::new();
    };

    map.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Stores the notification, then pushes it to the user's devices.
/// Only the insert can fail; push problems are logged.
pub async fn send_notification<C: ConnectionTrait>(
    db: &C,
    push: &dyn PushSender,
    user_id: i32,
    notice: &Notice,
) -> GymlyResult<notifications::Model> {
    let notification = NotificationModel {
        user_id: Set(user_id),
        kind: Set(notice.kind),
        title: Set(notice.title.clone()),
        body: Set(notice.body.clone()),
        data: Set(notice.data.clone()),
        is_read: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    debug!(
        "notification {} ({:?}) stored for user {user_id}",
        notification.id, notice.kind
    );

    if !push.is_enabled() {
        return Ok(notification);
    }

    let tokens: Vec<String> = match FcmTokens::find()
        .select_only()
        .column(fcm_tokens::Column::Token)
        .filter(fcm_tokens::Column::UserId.eq(user_id))
        .into_tuple()
        .all(db)
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("Failed to load push tokens for user {user_id}: {e}");
            return Ok(notification);
        }
    };

    if tokens.is_empty() {
        debug!("user {user_id} has no registered devices");
        return Ok(notification);
    }

    let report = push.send(&tokens, &notice.push_message()).await;

    if !report.stale_tokens.is_empty() {
        match FcmTokens::delete_many()
            .filter(fcm_tokens::Column::Token.is_in(report.stale_tokens.clone()))
            .exec(db)
            .await
        {
            Ok(result) => info!(
                "Pruned {} unregistered push token(s) of user {user_id}",
                result.rows_affected
            ),
            Err(e) => warn!("Failed to prune push tokens of user {user_id}: {e}"),
        }
    }

    Ok(notification)
}

/* Fan-out helpers. A failing recipient is logged and skipped so one bad row
 * can't undo a decision that has already been committed.
 */

async fn send_to_users<C: ConnectionTrait>(
    db: &C,
    push: &dyn PushSender,
    recipients: Vec<users::Model>,
    notice: &Notice,
) -> usize {
    let mut sent = 0;

    for user in recipients {
        match send_notification(db, push, user.id, notice).await {
            Ok(_) => sent += 1,
            Err(e) => error!("Failed to notify user {}: {e}", user.id),
        }
    }

    sent
}

pub async fn send_to_admins<C: ConnectionTrait>(
    db: &C,
    push: &dyn PushSender,
    notice: &Notice,
) -> GymlyResult<usize> {
    let admins = Users::find()
        .filter(users::Column::Role.eq(UserRole::Admin))
        .all(db)
        .await?;

    let sent = send_to_users(db, push, admins, notice).await;
    info!("\"{}\" sent to {sent} admin(s)", notice.title);

    Ok(sent)
}

/// Notifies every login account linked to `member_id`.
pub async fn send_to_member<C: ConnectionTrait>(
    db: &C,
    push: &dyn PushSender,
    member_id: i32,
    notice: &Notice,
) -> GymlyResult<usize> {
    let recipients = Users::find()
        .filter(users::Column::MemberId.eq(member_id))
        .all(db)
        .await?;

    if recipients.is_empty() {
        warn!("member {member_id} has no login account, \"{}\" not delivered", notice.title);
    }

    Ok(send_to_users(db, push, recipients, notice).await)
}
