use super::{
    AuthUser,
    database::{entities::Packages, packages},
    error::GymlyResult,
    gymly_api_response,
    state::AppState,
};
use axum::{
    body::Body,
    extract::State,
    http::{Response, StatusCode},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

/* GET /packages
 *
 * Active packages only, cheapest first.
 */
pub async fn get_packages(
    State(state): State<AppState>,
    _auth_user: AuthUser,
) -> GymlyResult<Response<Body>> {
    let packages = Packages::find()
        .filter(packages::Column::IsActive.eq(true))
        .order_by_asc(packages::Column::Price)
        .order_by_asc(packages::Column::Id)
        .all(&state.db)
        .await?;

    Ok(gymly_api_response(StatusCode::OK, packages))
}
