//! Error taxonomy for the catalog service.
//!
//! Domain failures are expressed as [`CatalogError`] and mapped to HTTP status
//! codes at the API boundary. Media link failures are kept separate as
//! [`ResolutionError`] because the listing path absorbs them per record
//! instead of failing the page.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by catalog operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Media link resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to obtain an access URL for a content identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Invalid content identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unknown content: {0}")]
    UnknownContent(String),

    #[error("Media gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Media gateway timed out resolving {0}")]
    Timeout(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl From<sqlx::Error> for CatalogError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CatalogError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                CatalogError::Timeout("Database connection pool".to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CatalogError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                CatalogError::NotFound(format!(
                    "Referenced record does not exist ({})",
                    db.constraint().unwrap_or("foreign key")
                ))
            }
            other => CatalogError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for CatalogError {
    fn from(rejection: JsonRejection) -> Self {
        CatalogError::InvalidArgument(rejection.body_text())
    }
}

impl From<QueryRejection> for CatalogError {
    fn from(rejection: QueryRejection) -> Self {
        CatalogError::InvalidArgument(rejection.body_text())
    }
}

impl From<PathRejection> for CatalogError {
    fn from(rejection: PathRejection) -> Self {
        CatalogError::InvalidArgument(rejection.body_text())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl CatalogError {
    /// HTTP status and stable error code for this failure
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            CatalogError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CatalogError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            CatalogError::Resolution(_) => (StatusCode::BAD_GATEWAY, "RESOLUTION_ERROR"),
            CatalogError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            CatalogError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            CatalogError::Internal(detail) => {
                error!(error = %detail, "Internal error while handling request");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CatalogError::InvalidArgument("take".into()), StatusCode::BAD_REQUEST),
            (CatalogError::NotFound("song".into()), StatusCode::NOT_FOUND),
            (CatalogError::Conflict("user".into()), StatusCode::CONFLICT),
            (CatalogError::Timeout("db".into()), StatusCode::GATEWAY_TIMEOUT),
            (CatalogError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                CatalogError::Resolution(ResolutionError::Unreachable("x".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_and_code().0, status, "{err}");
        }
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: CatalogError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let response = CatalogError::Internal("connection reset by peer".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
