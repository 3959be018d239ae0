use super::{
    database::{UserRole, Users},
    error::{GymlyError, GymlyResult},
    jwt,
    state::AppState,
};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{
        Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use sea_orm::EntityTrait;
use serde::Serialize;
use tracing::{debug, info};

/// The caller of a protected route, resolved by [`require_auth`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub user_id: i32,
    pub email: String,
    pub role: UserRole,
    pub member_id: Option<i32>,
}

impl AuthUser {
    pub fn require_role(&self, roles: &[UserRole]) -> GymlyResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(GymlyError::forbidden("Insufficient permissions"))
        }
    }

    pub fn require_member_id(&self) -> GymlyResult<i32> {
        self.member_id.ok_or_else(|| {
            GymlyError::forbidden("User is not associated with a member account")
        })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = GymlyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| GymlyError::Unauthorized("Not authenticated".to_string()))
    }
}

fn bearer_token(request: &Request<Body>) -> GymlyResult<&str> {
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| GymlyError::Unauthorized("No authorization header".to_string()))?;

    authorization
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| GymlyError::Unauthorized("Malformed authorization header".to_string()))
}

fn check_content_type(request: &Request<Body>) -> GymlyResult<()> {
    if request.method() == Method::GET || request.method() == Method::DELETE {
        return Ok(());
    }

    // bodiless POSTs (mark-all-read) send no content type at all
    let Some(content_type) = request.headers().get(CONTENT_TYPE) else {
        return Ok(());
    };

    let content_type = content_type
        .to_str()
        .map_err(|_| GymlyError::bad_request("Invalid content type"))?;

    if content_type.starts_with("application/json") || content_type.starts_with("multipart/form-data")
    {
        Ok(())
    } else {
        Err(GymlyError::bad_request("Wrong content type"))
    }
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GymlyError> {
    let token = bearer_token(&request)?;

    let claims = match jwt::verify_token(token, &state.tokens) {
        Ok(claims) => claims,
        Err(e) => {
            info!("Failed to verify token: {e:?}");
            return Err(GymlyError::Unauthorized("Invalid token".to_string()));
        }
    };

    let user = Users::find_by_id(claims.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| GymlyError::Unauthorized("User not found".to_string()))?;

    check_content_type(&request)?;

    debug!("authenticated user {} ({:?})", user.id, user.role);

    request.extensions_mut().insert(AuthUser {
        user_id: user.id,
        email: user.email,
        role: user.role,
        member_id: user.member_id,
    });

    Ok(next.run(request).await)
}

pub fn hash_password(password: &str) -> GymlyResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GymlyError::internal(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole, member_id: Option<i32>) -> AuthUser {
        AuthUser {
            user_id: 1,
            email: "someone@example.com".to_string(),
            role,
            member_id,
        }
    }

    #[test]
    fn hashes_verify_only_their_password() {
        let hash = hash_password("password123").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("password123", &hash));
        assert!(!verify_password("password124", &hash));
        assert!(!verify_password("password123", "not-a-phc-string"));
    }

    #[test]
    fn roles_gate_access() {
        let staff = user(UserRole::Staff, None);

        assert!(staff.require_role(&[UserRole::Admin, UserRole::Staff]).is_ok());
        assert!(matches!(
            staff.require_role(&[UserRole::Admin]),
            Err(GymlyError::Forbidden(_))
        ));
    }

    #[test]
    fn member_id_is_required_for_member_routes() {
        assert_eq!(user(UserRole::Member, Some(9)).require_member_id().unwrap(), 9);
        assert!(user(UserRole::Member, None).require_member_id().is_err());
    }

    #[test]
    fn bearer_prefix_is_required() {
        let request = Request::builder()
            .header(AUTHORIZATION, "Token abc")
            .body(Body::empty())
            .unwrap();

        assert!(bearer_token(&request).is_err());

        let request = Request::builder()
            .header(AUTHORIZATION, "Bearer abc")
            .body(Body::empty())
            .unwrap();

        assert_eq!(bearer_token(&request).unwrap(), "abc");
    }

    #[test]
    fn form_and_json_bodies_pass_the_content_type_check() {
        for content_type in ["application/json", "multipart/form-data; boundary=x"] {
            let request = Request::builder()
                .method(Method::POST)
                .header(CONTENT_TYPE, content_type)
                .body(Body::empty())
                .unwrap();
            assert!(check_content_type(&request).is_ok());
        }

        let request = Request::builder()
            .method(Method::POST)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::empty())
            .unwrap();
        assert!(check_content_type(&request).is_err());
    }
}
