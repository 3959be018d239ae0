use super::{
    auth::{AuthUser, verify_password},
    database::{entities::Users, users},
    error::{GymlyError, GymlyResult},
    gymly_api_response,
    state::AppState,
};
use crate::{
    APP_START,
    gymly::{BoxResult, jwt},
};
use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{Response, StatusCode},
    response::{Html, IntoResponse},
};
use humantime::format_duration;
use sea_orm::{
    EntityTrait, QueryFilter,
    sea_query::{Expr, Func},
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{fs::File, io::AsyncReadExt};
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

#[derive(Serialize)]
struct ServerInfo {
    name: String,
    version: String,
    description: String,
    license: String,
    server_uptime: String,
    system_uptime: String,
}

#[derive(Serialize)]
struct UptimeResponse {
    app_uptime: String,
    system_uptime: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: AuthUser,
}

pub async fn get_api_index() -> impl IntoResponse {
    let current_endpoints = ["/server-info", "/uptime"];

    let wrap_endpoints_with_hyperlinks = current_endpoints
        .iter()
        .map(|endpoint| format!("<li><a href=\"{endpoint}\">{endpoint}</a></li>"))
        .collect::<Vec<String>>();

    (
        StatusCode::OK,
        Html(format!(
            "<h1>Gymly API</h1>
            <p>Public endpoints:</p>
            <ul>
              {}
            </ul>
            <p>Everything else needs a bearer token from <code>POST /auth/login</code>.</p>",
            wrap_endpoints_with_hyperlinks.join("\n")
        )),
    )
}

async fn get_app_uptime() -> BoxResult<Duration> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(Duration::from_secs(now.saturating_sub(*APP_START)))
}

async fn get_system_uptime() -> BoxResult<Duration> {
    let mut contents = String::new();
    let mut file = File::open("/proc/uptime").await?;

    file.read_to_string(&mut contents).await?;

    let uptime: f64 = contents
        .split_whitespace()
        .next()
        .ok_or("No data in /proc/uptime")?
        .parse()?;

    if !uptime.is_finite() || uptime < 0.0 {
        return Err("Uptime is out of range".into());
    }

    // drop the fractional part so humantime doesn't print nanoseconds
    Ok(Duration::from_secs(uptime as u64))
}

async fn uptimes() -> (Duration, Duration) {
    let app_uptime = get_app_uptime().await.unwrap_or_else(|e| {
        error!("Error getting app uptime: {e}");
        Duration::ZERO
    });

    let system_uptime = get_system_uptime().await.unwrap_or_else(|e| {
        error!("Error getting system uptime: {e}");
        Duration::ZERO
    });

    (app_uptime, system_uptime)
}

pub async fn get_server_info() -> Response<Body> {
    let (app_uptime, system_uptime) = uptimes().await;

    gymly_api_response(
        StatusCode::OK,
        ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: env!("CARGO_PKG_DESCRIPTION").to_string(),
            license: env!("CARGO_PKG_LICENSE").to_string(),
            server_uptime: format_duration(app_uptime).to_string(),
            system_uptime: format_duration(system_uptime).to_string(),
        },
    )
}

pub async fn get_uptime() -> Response<Body> {
    let (app_uptime, system_uptime) = uptimes().await;

    gymly_api_response(
        StatusCode::OK,
        UptimeResponse {
            app_uptime: format_duration(app_uptime).to_string(),
            system_uptime: format_duration(system_uptime).to_string(),
        },
    )
}

/* POST /auth/login
 *
 * Emails match case-insensitively; accounts are provisioned by hand and
 * keep whatever casing the operator typed. Unknown emails and wrong
 * passwords get the same answer.
 */
pub async fn post_login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> GymlyResult<Response<Body>> {
    let Json(login) = body?;
    let email = login.email.trim();

    if email.is_empty() || login.password.is_empty() {
        return Err(GymlyError::bad_request("Email and password are required"));
    }

    let invalid = || GymlyError::Unauthorized("Invalid credentials".to_string());

    let Some(user) = Users::find()
        .filter(
            Expr::expr(Func::lower(Expr::col(users::Column::Email))).eq(email.to_lowercase()),
        )
        .one(&state.db)
        .await?
    else {
        info!("login failed: unknown email");
        return Err(invalid());
    };

    let password_hash = user.password_hash.clone();
    let matches =
        tokio::task::spawn_blocking(move || verify_password(&login.password, &password_hash))
            .await
            .map_err(|e| GymlyError::internal(format!("password check panicked: {e}")))?;

    if !matches {
        info!("login failed for user {}", user.id);
        return Err(invalid());
    }

    let claims = jwt::Claims::new(
        user.id,
        &user.email,
        user.role,
        user.member_id,
        state.tokens.lifetime(),
    );
    let access_token = jwt::generate_token(&claims, &state.tokens)
        .map_err(|e| GymlyError::internal(format!("failed to sign token: {e:?}")))?;

    info!("user {} logged in ({:?})", user.id, user.role);

    Ok(gymly_api_response(
        StatusCode::OK,
        LoginResponse {
            access_token,
            user: AuthUser {
                user_id: user.id,
                email: user.email,
                role: user.role,
                member_id: user.member_id,
            },
        },
    ))
}

#[cfg(test)]
mod tests {
    use crate::gymly::{
        database::UserRole,
        testing::{self, TestApp},
    };
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn login_returns_a_usable_token() {
        let app = TestApp::new().await;
        let member = testing::seed_member(&app.state.db, "Jane", "0911000001").await;
        testing::seed_user(&app.state.db, "jane@example.com", UserRole::Member, Some(member.id)).await;

        let (status, body) = app
            .call(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": "Jane@Example.com", "password": testing::PASSWORD })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "member");
        assert_eq!(body["user"]["memberId"], member.id);

        let token = body["accessToken"].as_str().unwrap();
        let (status, me) = app.call(Method::GET, "/auth/me", Some(token), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "jane@example.com");
        assert_eq!(me["member"]["name"], "Jane");
    }

    #[tokio::test]
    async fn mixed_case_accounts_can_log_in() {
        let app = TestApp::new().await;
        testing::seed_user(&app.state.db, "Admin@Gymly.com", UserRole::Admin, None).await;

        for email in ["Admin@Gymly.com", "admin@gymly.com", " ADMIN@GYMLY.COM "] {
            let (status, body) = app
                .call(
                    Method::POST,
                    "/auth/login",
                    None,
                    Some(json!({ "email": email, "password": testing::PASSWORD })),
                )
                .await;

            assert_eq!(status, StatusCode::OK, "{email}");
            assert_eq!(body["user"]["email"], "Admin@Gymly.com");
        }
    }

    #[tokio::test]
    async fn bad_credentials_look_the_same() {
        let app = TestApp::new().await;
        testing::seed_user(&app.state.db, "admin@gymly.com", UserRole::Admin, None).await;

        for (email, password) in [
            ("admin@gymly.com", "wrong-password"),
            ("nobody@gymly.com", testing::PASSWORD),
        ] {
            let (status, body) = app
                .call(
                    Method::POST,
                    "/auth/login",
                    None,
                    Some(json!({ "email": email, "password": password })),
                )
                .await;

            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["message"], "Invalid credentials");
        }
    }

    #[tokio::test]
    async fn malformed_login_is_a_bad_request() {
        let app = TestApp::new().await;

        let (status, body) = app
            .call(Method::POST, "/auth/login", None, Some(json!({ "email": 4 })))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn info_endpoints_are_public() {
        let app = TestApp::new().await;

        let (status, body) = app.call(Method::GET, "/server-info", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "gymly");

        let (status, body) = app.call(Method::GET, "/uptime", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["app_uptime"].is_string());
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404s() {
        let app = TestApp::new().await;

        let (status, body) = app.call(Method::GET, "/nowhere", None, None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Route not found");
    }
}
