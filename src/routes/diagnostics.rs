use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::ApiError;
use crate::services::reports::{self, ConsistencyReport};
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/diagnostics/consistency", get(consistency))
}

/// Invoices whose net plus VAT does not add up to gross, plus the overall sums.
pub async fn consistency(State(state): State<AppState>) -> Result<Json<ConsistencyReport>, ApiError> {
    let db = state.db()?;
    let report = reports::consistency_report(&db)?;
    if !report.inconsistent.is_empty() {
        tracing::info!(count = report.inconsistent.len(), "inconsistent invoice amounts found");
    }
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use crate::db::test_fixtures::invoice;
    use crate::models::Direction;
    use crate::routes::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn lists_rows_that_do_not_add_up() {
        let app = TestApp::new();
        let mut broken = invoice("D-1", "2024-01-01", Direction::Incoming, 100.0);
        broken.vat_amount = 20.0;
        app.state.db().unwrap().insert_invoice(&broken).unwrap();

        let response = app.get("/api/diagnostics/consistency").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["inconsistent"][0]["rechnungsnummer"], "D-1");
        assert_eq!(body["inconsistent"][0]["differenz"], 1.0);
        assert_eq!(body["sums"]["checked"], 1);
    }
}
