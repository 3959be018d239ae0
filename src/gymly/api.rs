use super::{
    auth::{self, AuthUser, require_auth},
    database,
    error::{self, GymlyError, GymlyResult},
    notify, storage,
    state::{self, AppState},
};

use axum::{
    Json, Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::routing::RouterExt;
use serde::{Deserialize, Serialize};

pub mod protected;
pub mod public;

use protected::{checkins, notifications, packages, subscriptions};

/* Receipts may be up to 5MB; leave room for the multipart framing. */
const SUBSCRIBE_BODY_LIMIT: usize = 6 * 1024 * 1024;

pub(crate) fn gymly_api_response<T: Serialize>(status: StatusCode, message: T) -> Response<Body> {
    (status, Json(message)).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub(crate) struct CountResponse {
    pub count: u64,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

pub const DEFAULT_PAGE_LIMIT: u64 = 10;
pub const MAX_PAGE_LIMIT: u64 = 100;

impl PageQuery {
    pub fn resolve(self, default_limit: u64) -> GymlyResult<Page> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(default_limit);

        if page < 1 {
            return Err(GymlyError::bad_request("page must be at least 1"));
        }

        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(GymlyError::bad_request(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        // the row offset ends up in a signed BIGINT OFFSET clause
        let in_range = (page - 1)
            .checked_mul(limit)
            .is_some_and(|offset| offset <= i64::MAX as u64);

        if !in_range {
            return Err(GymlyError::bad_request("page is out of range"));
        }

        Ok(Page { page, limit })
    }
}

impl Page {
    /// sea-orm paginators count pages from zero.
    pub fn index(&self) -> u64 {
        self.page - 1
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, page: Page) -> Self {
        Self {
            data,
            total,
            page: page.page,
            limit: page.limit,
            total_pages: total.div_ceil(page.limit),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(public::get_api_index))
        .route_with_tsr("/server-info", get(public::get_server_info))
        .route_with_tsr("/uptime", get(public::get_uptime))
        .route_with_tsr("/auth/login", post(public::post_login));

    let protected_routes = Router::new()
        .route_with_tsr("/auth/me", get(protected::get_me))
        .route_with_tsr("/packages", get(packages::get_packages))
        .route_with_tsr(
            "/subscriptions/subscribe",
            post(subscriptions::post_subscribe).layer(DefaultBodyLimit::max(SUBSCRIBE_BODY_LIMIT)),
        )
        .route_with_tsr("/subscriptions", get(subscriptions::get_subscriptions))
        .route_with_tsr("/subscriptions/me", get(subscriptions::get_my_subscriptions))
        .route_with_tsr(
            "/subscriptions/{id}/approve",
            post(subscriptions::post_approve),
        )
        .route_with_tsr("/subscriptions/{id}/deny", post(subscriptions::post_deny))
        .route_with_tsr(
            "/checkins",
            post(checkins::post_check_in).get(checkins::get_check_ins),
        )
        .route_with_tsr("/checkins/me", get(checkins::get_my_check_ins))
        .route_with_tsr(
            "/notifications/fcm-token",
            post(notifications::post_fcm_token),
        )
        .route_with_tsr(
            "/notifications/fcm-token/{token}",
            delete(notifications::delete_fcm_token),
        )
        .route_with_tsr("/notifications", get(notifications::get_notifications))
        .route_with_tsr(
            "/notifications/unread-count",
            get(notifications::get_unread_count),
        )
        .route_with_tsr(
            "/notifications/mark-read",
            post(notifications::post_mark_read),
        )
        .route_with_tsr(
            "/notifications/mark-all-read",
            post(notifications::post_mark_all_read),
        )
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> GymlyError {
    GymlyError::not_found("Route not found")
}
