use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::services::crypto::{SignatureError, SignedUrl};
use crate::services::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignQuery {
    pub path: String,
}

/// Short-lived download link for a stored document. Requires a session.
pub async fn sign(
    State(state): State<AppState>,
    Query(query): Query<SignQuery>,
) -> Result<Json<SignedUrl>, ApiError> {
    let path = query.path.trim();
    if path.is_empty() {
        return Err(ApiError::BadRequest("Pfad fehlt".to_string()));
    }
    Ok(Json(state.signer.sign(path)))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub path: String,
    pub expires: i64,
    pub signature: String,
}

fn content_type(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "csv" => "text/csv; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Serves a document when the signature matches and has not expired. No session needed.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    state
        .signer
        .verify(&query.path, query.expires, &query.signature)
        .map_err(|e| {
            if e == SignatureError::Expired {
                tracing::debug!(path = %query.path, "expired download link");
            }
            ApiError::Unauthorized(e.to_string())
        })?;

    let bytes = state.storage.get(&query.path).await.map_err(|e| {
        tracing::warn!(path = %query.path, error = %e, "document not available");
        ApiError::NotFound(format!("Datei nicht gefunden: {}", query.path))
    })?;

    let file_name = query.path.rsplit('/').next().unwrap_or(&query.path).to_string();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type(&query.path).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}
