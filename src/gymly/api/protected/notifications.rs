use super::{
    AuthUser, CountResponse, PageQuery, Paginated, SuccessResponse, database,
    error::{GymlyError, GymlyResult},
    gymly_api_response,
    state::AppState,
};
use database::{
    Platform,
    entities::{FcmTokenModel, FcmTokens, Notifications},
    fcm_tokens, notifications,
};

use axum::{
    Json,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{Response, StatusCode},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter,
    QueryOrder, Set, prelude::Expr,
};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

pub const DEFAULT_NOTIFICATION_LIMIT: u64 = 20;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenRequest {
    pub token: String,
    pub device_id: Option<String>,
    pub platform: Option<Platform>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsQuery {
    pub is_read: Option<bool>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub notification_ids: Vec<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    #[serde(flatten)]
    pub page: Paginated<notifications::Model>,
    pub unread_count: u64,
}

async fn unread_count(state: &AppState, user_id: i32) -> GymlyResult<u64> {
    Ok(Notifications::find()
        .filter(notifications::Column::UserId.eq(user_id))
        .filter(notifications::Column::IsRead.eq(false))
        .count(&state.db)
        .await?)
}

/* POST /notifications/fcm-token
 *
 * Tokens are unique per device, so a token registered by someone else
 * moves to the caller (shared device, new login).
 */
pub async fn post_fcm_token(
    State(state): State<AppState>,
    auth_user: AuthUser,
    body: Result<Json<RegisterTokenRequest>, JsonRejection>,
) -> GymlyResult<Response<Body>> {
    let Json(request) = body?;
    let token = request.token.trim().to_string();

    if token.is_empty() {
        return Err(GymlyError::bad_request("token must not be empty"));
    }

    let now = Utc::now();
    let existing = FcmTokens::find()
        .filter(fcm_tokens::Column::Token.eq(token.as_str()))
        .one(&state.db)
        .await?;

    match existing {
        Some(existing) => {
            let previous_owner = existing.user_id;
            let mut model = existing.into_active_model();
            model.user_id = Set(auth_user.user_id);
            model.device_id = Set(request.device_id);
            model.platform = Set(request.platform);
            model.updated_at = Set(now);
            model.update(&state.db).await?;

            if previous_owner != auth_user.user_id {
                info!(
                    "push token moved from user {previous_owner} to user {}",
                    auth_user.user_id
                );
            }
        }
        None => {
            FcmTokenModel {
                user_id: Set(auth_user.user_id),
                token: Set(token),
                device_id: Set(request.device_id),
                platform: Set(request.platform),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&state.db)
            .await?;

            info!("push token registered for user {}", auth_user.user_id);
        }
    }

    Ok(gymly_api_response(
        StatusCode::CREATED,
        SuccessResponse { success: true },
    ))
}

/* DELETE /notifications/fcm-token/{token} */
pub async fn delete_fcm_token(
    State(state): State<AppState>,
    auth_user: AuthUser,
    path: Result<Path<String>, PathRejection>,
) -> GymlyResult<Response<Body>> {
    let Path(token) = path?;

    let result = FcmTokens::delete_many()
        .filter(fcm_tokens::Column::Token.eq(token))
        .filter(fcm_tokens::Column::UserId.eq(auth_user.user_id))
        .exec(&state.db)
        .await?;

    debug!(
        "removed {} push token(s) of user {}",
        result.rows_affected, auth_user.user_id
    );

    Ok(gymly_api_response(
        StatusCode::OK,
        SuccessResponse {
            success: result.rows_affected > 0,
        },
    ))
}

/* GET /notifications */
pub async fn get_notifications(
    State(state): State<AppState>,
    auth_user: AuthUser,
    query: Result<Query<NotificationsQuery>, QueryRejection>,
) -> GymlyResult<Response<Body>> {
    let Query(query) = query?;
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(DEFAULT_NOTIFICATION_LIMIT)?;

    let mut select = Notifications::find()
        .filter(notifications::Column::UserId.eq(auth_user.user_id));

    if let Some(is_read) = query.is_read {
        select = select.filter(notifications::Column::IsRead.eq(is_read));
    }

    let paginator = select
        .order_by_desc(notifications::Column::CreatedAt)
        .order_by_desc(notifications::Column::Id)
        .paginate(&state.db, page.limit);

    let total = paginator.num_items().await?;
    let data = paginator.fetch_page(page.index()).await?;

    Ok(gymly_api_response(
        StatusCode::OK,
        NotificationPage {
            page: Paginated::new(data, total, page),
            unread_count: unread_count(&state, auth_user.user_id).await?,
        },
    ))
}

/* GET /notifications/unread-count */
pub async fn get_unread_count(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> GymlyResult<Response<Body>> {
    Ok(gymly_api_response(
        StatusCode::OK,
        CountResponse {
            count: unread_count(&state, auth_user.user_id).await?,
        },
    ))
}

/* POST /notifications/mark-read
 *
 * Counts every owned id, read already or not.
 */
pub async fn post_mark_read(
    State(state): State<AppState>,
    auth_user: AuthUser,
    body: Result<Json<MarkReadRequest>, JsonRejection>,
) -> GymlyResult<Response<Body>> {
    let Json(request) = body?;

    if request.notification_ids.is_empty() {
        return Ok(gymly_api_response(StatusCode::OK, CountResponse { count: 0 }));
    }

    let result = Notifications::update_many()
        .col_expr(notifications::Column::IsRead, Expr::value(true))
        .filter(notifications::Column::Id.is_in(request.notification_ids))
        .filter(notifications::Column::UserId.eq(auth_user.user_id))
        .exec(&state.db)
        .await?;

    Ok(gymly_api_response(
        StatusCode::OK,
        CountResponse {
            count: result.rows_affected,
        },
    ))
}

/* POST /notifications/mark-all-read */
pub async fn post_mark_all_read(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> GymlyResult<Response<Body>> {
    let result = Notifications::update_many()
        .col_expr(notifications::Column::IsRead, Expr::value(true))
        .filter(notifications::Column::UserId.eq(auth_user.user_id))
        .filter(notifications::Column::IsRead.eq(false))
        .exec(&state.db)
        .await?;

    info!(
        "user {} marked {} notification(s) read",
        auth_user.user_id, result.rows_affected
    );

    Ok(gymly_api_response(
        StatusCode::OK,
        CountResponse {
            count: result.rows_affected,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gymly::{
        database::{NotificationType, UserRole, users},
        testing::{self, TestApp},
    };
    use axum::http::Method;
    use serde_json::json;

    struct Inbox {
        app: TestApp,
        jane: users::Model,
        abebe: users::Model,
    }

    async fn inbox() -> Inbox {
        let app = TestApp::new().await;
        let db = &app.state.db;
        let jane = testing::seed_user(db, "jane@example.com", UserRole::Staff, None).await;
        let abebe = testing::seed_user(db, "abebe@example.com", UserRole::Staff, None).await;

        for title in ["first", "second", "third"] {
            testing::seed_notification(db, jane.id, NotificationType::SubscriptionRequest, title)
                .await;
        }
        testing::seed_notification(db, abebe.id, NotificationType::SubscriptionApproved, "theirs")
            .await;

        Inbox { app, jane, abebe }
    }

    #[tokio::test]
    async fn lists_are_newest_first_with_unread_count() {
        let i = inbox().await;
        let token = i.app.token_for(&i.jane);

        let (status, body) = i
            .app
            .call(Method::GET, "/notifications?limit=2", Some(&token), None)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["totalPages"], 2);
        assert_eq!(body["unreadCount"], 3);
        assert_eq!(body["data"][0]["title"], "third");
        assert_eq!(body["data"][0]["type"], "subscription_request");

        let (_, body) = i
            .app
            .call(Method::GET, "/notifications", Some(&token), None)
            .await;
        assert_eq!(body["limit"], 20);
    }

    #[tokio::test]
    async fn marking_read_only_touches_own_notifications() {
        let i = inbox().await;
        let token = i.app.token_for(&i.jane);

        let all: Vec<i32> = Notifications::find()
            .all(&i.app.state.db)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();

        let (status, body) = i
            .app
            .call(
                Method::POST,
                "/notifications/mark-read",
                Some(&token),
                Some(json!({ "notificationIds": all })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);

        let (_, body) = i
            .app
            .call(
                Method::GET,
                "/notifications/unread-count",
                Some(&i.app.token_for(&i.abebe)),
                None,
            )
            .await;
        assert_eq!(body["count"], 1);

        let (_, body) = i
            .app
            .call(Method::GET, "/notifications?isRead=false", Some(&token), None)
            .await;
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn marking_read_twice_still_counts_owned_ids() {
        let i = inbox().await;
        let token = i.app.token_for(&i.jane);
        let first = Notifications::find()
            .filter(notifications::Column::UserId.eq(i.jane.id))
            .one(&i.app.state.db)
            .await
            .unwrap()
            .unwrap();

        for _ in 0..2 {
            let (status, body) = i
                .app
                .call(
                    Method::POST,
                    "/notifications/mark-read",
                    Some(&token),
                    Some(json!({ "notificationIds": [first.id] })),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["count"], 1);
        }

        let (_, body) = i
            .app
            .call(Method::GET, "/notifications/unread-count", Some(&token), None)
            .await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn mark_all_read_counts_changes() {
        let i = inbox().await;
        let token = i.app.token_for(&i.jane);

        let (status, body) = i
            .app
            .call(Method::POST, "/notifications/mark-all-read", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);

        let (_, body) = i
            .app
            .call(Method::POST, "/notifications/mark-all-read", Some(&token), None)
            .await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn tokens_move_between_users() {
        let i = inbox().await;
        let jane = i.app.token_for(&i.jane);
        let abebe = i.app.token_for(&i.abebe);
        let body = json!({ "token": "shared-tablet", "platform": "android" });

        let (status, _) = i
            .app
            .call(Method::POST, "/notifications/fcm-token", Some(&jane), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, response) = i
            .app
            .call(Method::POST, "/notifications/fcm-token", Some(&abebe), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response["success"], true);

        let tokens = FcmTokens::find().all(&i.app.state.db).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].user_id, i.abebe.id);
        assert_eq!(tokens[0].platform, Some(Platform::Android));

        // jane no longer owns it
        let (_, response) = i
            .app
            .call(
                Method::DELETE,
                "/notifications/fcm-token/shared-tablet",
                Some(&jane),
                None,
            )
            .await;
        assert_eq!(response["success"], false);

        let (_, response) = i
            .app
            .call(
                Method::DELETE,
                "/notifications/fcm-token/shared-tablet",
                Some(&abebe),
                None,
            )
            .await;
        assert_eq!(response["success"], true);
    }

    #[tokio::test]
    async fn unknown_platforms_are_rejected() {
        let i = inbox().await;

        let (status, _) = i
            .app
            .call(
                Method::POST,
                "/notifications/fcm-token",
                Some(&i.app.token_for(&i.jane)),
                Some(json!({ "token": "abc", "platform": "blackberry" })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
