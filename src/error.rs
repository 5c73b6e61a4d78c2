use crate::orchestration::ConnectError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Too recent: {days_remaining} days remaining")]
    TooRecent { days_remaining: i64 },
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ConnectError> for AppError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::InvalidInput(msg) => AppError::BadRequest(msg),
            ConnectError::NotFound(msg) => AppError::NotFound(msg),
            ConnectError::Conflict(msg) => AppError::Conflict(msg),
            ConnectError::TooRecent { days_remaining } => AppError::TooRecent { days_remaining },
            ConnectError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<crate::domain::PrimitiveParseError> for AppError {
    fn from(err: crate::domain::PrimitiveParseError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::TooRecent { days_remaining } => (
                StatusCode::CONFLICT,
                json!({
                    "error": format!("link can be removed in {} days", days_remaining),
                    "daysRemaining": days_remaining,
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_errors_map_to_status() {
        let cases = [
            (ConnectError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ConnectError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ConnectError::Conflict("x".into()), StatusCode::CONFLICT),
            (ConnectError::TooRecent { days_remaining: 3 }, StatusCode::CONFLICT),
            (ConnectError::Db(sqlx::Error::RowNotFound), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
