pub mod checkins;
pub mod notifications;
pub mod packages;
pub mod subscriptions;

use super::{
    AuthUser, CountResponse, DEFAULT_PAGE_LIMIT, PageQuery, Paginated, SuccessResponse, database,
    error, gymly_api_response, notify,
    state::{self, AppState},
    storage,
};

use axum::{body::Body, extract::State, http::Response, http::StatusCode};
use sea_orm::EntityTrait;
use serde::Serialize;

use database::{entities::Members, members};
use error::GymlyResult;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: AuthUser,
    pub member: Option<members::Model>,
}

/* GET /auth/me */
pub async fn get_me(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> GymlyResult<Response<Body>> {
    let member = match auth_user.member_id {
        Some(member_id) => Members::find_by_id(member_id).one(&state.db).await?,
        None => None,
    };

    Ok(gymly_api_response(
        StatusCode::OK,
        MeResponse {
            user: auth_user,
            member,
        },
    ))
}
