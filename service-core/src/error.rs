use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// A single rejected row from a bulk import.
///
/// Row numbers are the line numbers of the source file (data rows start
/// at 2, after the header).
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub row: usize,
    pub error: String,
}

impl RowError {
    pub fn new(row: usize, error: impl Into<String>) -> Self {
        Self {
            row,
            error: error.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("State conflict: {0}")]
    StateConflict(anyhow::Error),

    #[error("Validation failed for {} row(s)", .0.len())]
    RowValidation(Vec<RowError>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),
}

impl AppError {
    /// The rejected rows, when this error is a batch validation failure.
    pub fn row_errors(&self) -> Option<&[RowError]> {
        match self {
            AppError::RowValidation(rows) => Some(rows),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        let (status, error_message, details) = match self {
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err.to_string(), None),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::StateConflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::RowValidation(rows) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                serde_json::to_value(&rows).ok(),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(serde_json::Value::String(format!("{:#}", err))),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(serde_json::Value::String(err.to_string())),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let res = AppError::NotFound(anyhow::anyhow!("no lease for unit")).into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_kinds_map_to_409() {
        let res = AppError::Conflict(anyhow::anyhow!("bill already exists")).into_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = AppError::StateConflict(anyhow::anyhow!("bill not in draft")).into_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn row_validation_maps_to_422_and_keeps_rows() {
        let err = AppError::RowValidation(vec![
            RowError::new(2, "missing required field(s)"),
            RowError::new(5, "invalid date format, expected YYYY-MM-DD"),
        ]);
        assert_eq!(err.row_errors().map(<[RowError]>::len), Some(2));
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let res = AppError::Forbidden(anyhow::anyhow!("role clerk cannot approve")).into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
