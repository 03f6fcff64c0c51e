//! HTTP surface. Handlers validate the request, call into `db`/`services` and shape JSON.

pub mod auth;
pub mod dashboard;
pub mod diagnostics;
pub mod fees;
pub mod files;
pub mod imports;
pub mod invoices;
pub mod platforms;

use axum::extract::{DefaultBodyLimit, Multipart};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::collections::HashMap;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::services::processor::{ImportOptions, UploadedFile};
use crate::services::state::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .merge(dashboard::routes())
        .merge(invoices::routes())
        .merge(fees::routes())
        .merge(imports::routes())
        .merge(platforms::routes())
        .merge(diagnostics::routes())
        .route("/api/files/sign", get(files::sign))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_session));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/files/download", get(files::download));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Attachment download with a German-friendly CSV content type.
pub(crate) fn csv_response(file_name: &str, bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response()
}

/// Uploaded files and plain form fields of a multipart request.
#[derive(Debug, Default)]
pub(crate) struct FormData {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?.to_vec();
                    form.files.push(UploadedFile {
                        name: file_name,
                        content_type,
                        bytes,
                    });
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    pub fn single_file(mut self) -> Result<(UploadedFile, HashMap<String, String>), ApiError> {
        if self.files.is_empty() {
            return Err(ApiError::BadRequest("Keine Datei hochgeladen".to_string()));
        }
        let file = self.files.swap_remove(0);
        Ok((file, self.fields))
    }

    /// Form fields override the query-string options.
    pub fn apply_options(&self, options: &mut ImportOptions) -> Result<(), ApiError> {
        let bad = |field: &str, value: &str| ApiError::BadRequest(format!("Ungültiger Wert für {}: '{}'", field, value));
        if let Some(value) = self.fields.get("typ") {
            options.typ = value.parse().map_err(|_| bad("typ", value))?;
        }
        if let Some(value) = self.fields.get("plattform") {
            options.plattform = crate::models::Platform::parse_optional(value).map_err(|_| bad("plattform", value))?;
        }
        if let Some(value) = self.fields.get("updateExisting") {
            options.update_existing = parse_flag(value).ok_or_else(|| bad("updateExisting", value))?;
        }
        if let Some(value) = self.fields.get("estimateFees") {
            options.estimate_fees = parse_flag(value).ok_or_else(|| bad("estimateFees", value))?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "ja" | "on" => Some(true),
        "false" | "0" | "nein" | "off" | "" => Some(false),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn health_needs_no_session() {
        let app = TestApp::new();
        let response = app
            .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn api_rejects_requests_without_session() {
        let app = TestApp::new();
        let response = app
            .send(Request::builder().uri("/api/invoices").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
    }

    #[test]
    fn flags_accept_german_and_english() {
        assert_eq!(super::parse_flag("ja"), Some(true));
        assert_eq!(super::parse_flag("false"), Some(false));
        assert_eq!(super::parse_flag("vielleicht"), None);
    }
}
