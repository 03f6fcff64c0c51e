use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;

use crate::error::ApiError;
use crate::models::DashboardStats;
use crate::services::reports;
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/dashboard", get(get_dashboard_stats))
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    /// `YYYY-MM`, defaults to the current month
    pub monat: Option<String>,
}

fn month_start(monat: Option<&str>) -> Result<NaiveDate, ApiError> {
    match monat.map(str::trim).filter(|m| !m.is_empty()) {
        Some(month) => NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Ungültiger Monat: '{}' (erwartet JJJJ-MM)", month))),
        None => {
            let now = Local::now();
            NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
                .ok_or_else(|| ApiError::Internal("Ungültiges Systemdatum".to_string()))
        }
    }
}

pub async fn get_dashboard_stats(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardStats>, ApiError> {
    let month = month_start(query.monat.as_deref())?;
    let db = state.db()?;
    Ok(Json(reports::dashboard(&db, month)?))
}
