use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get};
use axum::{Json, Router};

use crate::error::ApiError;
use crate::models::{AdCost, Fee, NewAdCost, NewFee};
use crate::routes::csv_response;
use crate::services::csv_io;
use crate::services::reports::ReportQuery;
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/invoices/{id}/fees", get(list_fees).post(add_fee))
        .route("/api/fees/export", get(export_fees))
        .route("/api/fees/{id}", delete(delete_fee))
        .route("/api/ad-costs", get(list_ad_costs).post(add_ad_cost))
        .route("/api/ad-costs/{id}", delete(delete_ad_cost))
}

fn check_amount(amount: f64) -> Result<(), ApiError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ApiError::BadRequest(format!("Ungültiger Betrag: {}", amount)));
    }
    Ok(())
}

pub async fn list_fees(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
) -> Result<Json<Vec<Fee>>, ApiError> {
    let db = state.db()?;
    if db.get_invoice(invoice_id)?.is_none() {
        return Err(ApiError::not_found("Rechnung", invoice_id));
    }
    Ok(Json(db.fees_for_invoice(invoice_id)?))
}

pub async fn add_fee(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    Json(fee): Json<NewFee>,
) -> Result<(StatusCode, Json<Fee>), ApiError> {
    check_amount(fee.amount)?;
    let db = state.db()?;
    if db.get_invoice(invoice_id)?.is_none() {
        return Err(ApiError::not_found("Rechnung", invoice_id));
    }
    let created = db.insert_fee(invoice_id, &fee)?;
    tracing::debug!(invoice_id, fee_id = created.id, fee_type = fee.fee_type.as_str(), "fee added");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_fee(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    if !state.db()?.delete_fee(id)? {
        return Err(ApiError::not_found("Gebühr", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// All fee rows, optionally limited by `von`, `bis` and `plattform`.
pub async fn export_fees(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let rows = state.db()?.list_fee_rows(query.von, query.bis, query.plattform)?;
    Ok(csv_response("gebuehren.csv", csv_io::write_fee_rows(&rows)?))
}

pub async fn list_ad_costs(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<AdCost>>, ApiError> {
    let costs = state.db()?.list_ad_costs(query.von, query.bis, query.plattform)?;
    Ok(Json(costs))
}

pub async fn add_ad_cost(
    State(state): State<AppState>,
    Json(cost): Json<NewAdCost>,
) -> Result<(StatusCode, Json<AdCost>), ApiError> {
    check_amount(cost.amount)?;
    let created = state.db()?.insert_ad_cost(&cost)?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_ad_cost(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    if !state.db()?.delete_ad_cost(id)? {
        return Err(ApiError::not_found("Werbekosten", id));
    }
    Ok(StatusCode::NO_CONTENT)
}
