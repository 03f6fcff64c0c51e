//! HTTP error type shared by all route handlers.
//!
//! Every failure leaves the server as JSON:
//! ```json
//! { "error": "Rechnung nicht gefunden: 42", "code": "NOT_FOUND" }
//! ```

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::processor::ImportError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The document-AI or blob service failed.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ApiError::NotFound(format!("{} nicht gefunden: {}", entity, id))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "Interner Serverfehler".to_string()
            }
            ApiError::Upstream(detail) => {
                tracing::warn!(error = %detail, "external service failed");
                detail.clone()
            }
            other => other.to_string(),
        };
        (
            self.status(),
            Json(json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = error {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                // SQLite names tables and columns here; that stays in the log.
                tracing::warn!(detail = ?message, "constraint violation");
                return ApiError::Conflict("Eintrag existiert bereits".to_string());
            }
        }
        ApiError::Internal(format!("Datenbankfehler: {}", error))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", error))
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::BadRequest(format!("Ungültiger Upload: {}", error.body_text()))
    }
}

impl From<ImportError> for ApiError {
    fn from(error: ImportError) -> Self {
        match error {
            ImportError::Invalid(message) => ApiError::BadRequest(message),
            ImportError::Duplicate(message) => ApiError::Conflict(message),
            ImportError::Storage(message) => ApiError::Upstream(message),
            ImportError::Internal(error) => ApiError::from(error),
        }
    }
}

impl From<csv::Error> for ApiError {
    fn from(error: csv::Error) -> Self {
        ApiError::Internal(format!("CSV-Fehler: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_variants_to_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("Rechnung", 1).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Upstream("KI-Dienst".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn import_errors_keep_their_meaning() {
        let invalid = ApiError::from(ImportError::Invalid("keine PDFs".into()));
        assert!(matches!(invalid, ApiError::BadRequest(ref m) if m == "keine PDFs"));
        assert!(matches!(
            ApiError::from(ImportError::Duplicate("RE-1".into())),
            ApiError::Conflict(_)
        ));
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        match ApiError::from(err) {
            ApiError::Conflict(message) => assert_eq!(message, "Eintrag existiert bereits"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
