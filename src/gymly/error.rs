use axum::{
    Json,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use super::database::CheckInStatus;

pub type GymlyResult<T> = Result<T, GymlyError>;

#[derive(Error, Debug)]
pub enum GymlyError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("No active subscription")]
    CheckInDenied { check_in_id: i32, member_id: i32 },
}

#[derive(Serialize)]
pub(crate) struct GymlyApiResponse {
    pub status: u16,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckInDeniedResponse {
    status: u16,
    message: String,
    check_in_id: i32,
    member_id: i32,
    check_in_status: CheckInStatus,
}

impl GymlyError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Status code and client-facing message. Database details stay in the logs.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message.clone()),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message.clone()),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            Self::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, message.clone())
            }
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            Self::Database(err) => classify_db_error(err),
            Self::CheckInDenied { .. } => (StatusCode::FORBIDDEN, self.to_string()),
        }
    }
}

fn classify_db_error(err: &DbErr) -> (StatusCode, String) {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => (
            StatusCode::CONFLICT,
            "A record with these unique fields already exists".to_string(),
        ),
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => (
            StatusCode::BAD_REQUEST,
            "Invalid reference: The related record does not exist".to_string(),
        ),
        _ => match err {
            DbErr::RecordNotFound(_) | DbErr::RecordNotUpdated => (
                StatusCode::NOT_FOUND,
                "The requested record was not found".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected database error occurred".to_string(),
            ),
        },
    }
}

impl IntoResponse for GymlyError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        match &self {
            Self::Database(err) => error!("database error [{status}]: {err}"),
            Self::Internal(err) => error!("internal error: {err}"),
            _ if status.is_server_error() => warn!("{status}: {message}"),
            _ => {}
        }

        if let Self::CheckInDenied {
            check_in_id,
            member_id,
        } = self
        {
            return (
                status,
                Json(CheckInDeniedResponse {
                    status: status.as_u16(),
                    message,
                    check_in_id,
                    member_id,
                    check_in_status: CheckInStatus::Denied,
                }),
            )
                .into_response();
        }

        (
            status,
            Json(GymlyApiResponse {
                status: status.as_u16(),
                message,
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for GymlyError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for GymlyError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for GymlyError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for GymlyError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for GymlyError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(err.body_text())
    }
}
