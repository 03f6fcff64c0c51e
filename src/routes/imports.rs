use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::ApiError;
use crate::routes::FormData;
use crate::services::processor::{self, ImportOptions, ImportReport};
use crate::services::progress::ProgressSnapshot;
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/import/csv", post(import_csv))
        .route("/api/import/pdf", post(import_pdf))
        .route("/api/import/zip", post(import_zip))
        .route("/api/import/unified", post(import_unified))
        .route("/api/import/platform", post(import_platform))
        .route("/api/import/zip/start", post(start_zip_import))
        .route("/api/import/zip/progress/{id}", get(zip_progress))
}

/// Reads the multipart body and merges its option fields over the query string.
async fn read_upload(multipart: Multipart, mut options: ImportOptions) -> Result<(FormData, ImportOptions), ApiError> {
    let form = FormData::read(multipart).await?;
    form.apply_options(&mut options)?;
    Ok((form, options))
}

fn require_extension(name: &str, extension: &str) -> Result<(), ApiError> {
    let matches = name
        .rsplit_once('.')
        .map_or(false, |(_, ext)| ext.eq_ignore_ascii_case(extension));
    if !matches {
        return Err(ApiError::BadRequest(format!(
            "'{}' ist keine .{}-Datei",
            name, extension
        )));
    }
    Ok(())
}

pub async fn import_csv(
    State(state): State<AppState>,
    Query(options): Query<ImportOptions>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let (form, options) = read_upload(multipart, options).await?;
    let (file, _) = form.single_file()?;
    let report = processor::import_csv(&state, &file.name, &file.bytes, &options)?;
    Ok(Json(report))
}

/// Marketplace export; `plattform` is required and every row becomes outgoing.
pub async fn import_platform(
    State(state): State<AppState>,
    Query(options): Query<ImportOptions>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let (form, options) = read_upload(multipart, options).await?;
    let (file, _) = form.single_file()?;
    let report = processor::import_platform_csv(&state, &file.name, &file.bytes, &options)?;
    Ok(Json(report))
}

pub async fn import_pdf(
    State(state): State<AppState>,
    Query(options): Query<ImportOptions>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let (form, options) = read_upload(multipart, options).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("Keine Datei hochgeladen".to_string()));
    }
    for file in &form.files {
        require_extension(&file.name, "pdf")?;
    }

    let mut report = ImportReport::default();
    for file in form.files {
        let outcome = processor::process_pdf(&state, &file.name, file.bytes, &options).await;
        report.record(outcome);
    }
    Ok(Json(report))
}

pub async fn import_zip(
    State(state): State<AppState>,
    Query(options): Query<ImportOptions>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let (form, options) = read_upload(multipart, options).await?;
    let (file, _) = form.single_file()?;
    let report = processor::import_zip(&state, &file.name, file.bytes, &options).await?;
    Ok(Json(report))
}

pub async fn import_unified(
    State(state): State<AppState>,
    Query(options): Query<ImportOptions>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, ApiError> {
    let (form, options) = read_upload(multipart, options).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("Keine Dateien hochgeladen".to_string()));
    }
    let count = form.files.len();
    let report = processor::import_unified(&state, form.files, &options).await;
    tracing::info!(
        files = count,
        imported = report.imported,
        failed = report.failed,
        "unified import finished"
    );
    Ok(Json(report))
}

/// Answers right away; the archive is processed in the background.
pub async fn start_zip_import(
    State(state): State<AppState>,
    Query(options): Query<ImportOptions>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (form, options) = read_upload(multipart, options).await?;
    let (file, _) = form.single_file()?;
    let (import_id, total) = processor::start_zip_import(&state, file.bytes, options).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "importId": import_id, "total": total })),
    ))
}

pub async fn zip_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProgressSnapshot>, ApiError> {
    state
        .progress
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Import", id))
}
