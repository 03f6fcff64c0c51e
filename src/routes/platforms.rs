use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::Platform;
use crate::routes::csv_response;
use crate::services::platform::{detect_platform, estimate_fees, FeeEstimate};
use crate::services::reports::{self, PlatformDetailRow, PlatformSummary, ReportQuery};
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/platforms/summary", get(summary))
        .route("/api/platforms/detail", get(detail))
        .route("/api/platforms/export", get(export))
        .route("/api/platforms/detect", post(detect))
}

fn range(query: &ReportQuery) -> Result<(NaiveDate, NaiveDate), ApiError> {
    query.range().map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub async fn summary(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<PlatformSummary>, ApiError> {
    let (from, to) = range(&query)?;
    let db = state.db()?;
    Ok(Json(reports::platform_summary(&db, from, to, query.plattform)?))
}

pub async fn detail(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<PlatformDetailRow>>, ApiError> {
    let (from, to) = range(&query)?;
    let db = state.db()?;
    Ok(Json(reports::platform_detail(&db, from, to, query.plattform)?))
}

pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let (from, to) = range(&query)?;
    let rows = {
        let db = state.db()?;
        reports::platform_detail(&db, from, to, query.plattform)?
    };
    let file_name = format!("plattformen-{}-{}.csv", from.format("%Y%m%d"), to.format("%Y%m%d"));
    Ok(csv_response(&file_name, reports::platform_detail_csv(&rows)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub zahlungsmethode: Option<String>,
    #[serde(default)]
    pub bestellnummer: Option<String>,
    #[serde(default)]
    pub referenz: Option<String>,
    #[serde(default)]
    pub lieferant: Option<String>,
    #[serde(rename = "betragBrutto", default)]
    pub betrag_brutto: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub plattform: Option<Platform>,
    /// Only present when a platform was found and a gross amount was given.
    pub gebuehren: Option<FeeEstimate>,
}

pub async fn detect(Json(request): Json<DetectRequest>) -> Json<DetectResponse> {
    let platform = detect_platform(
        request.zahlungsmethode.as_deref(),
        request.bestellnummer.as_deref(),
        request.referenz.as_deref(),
        request.lieferant.as_deref(),
    );
    let fees = platform
        .zip(request.betrag_brutto)
        .map(|(platform, gross)| estimate_fees(platform, gross));
    Json(DetectResponse {
        plattform: platform,
        gebuehren: fees,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::test_fixtures::platform_invoice;
    use crate::models::{FeeType, NewFee, Platform};
    use crate::routes::test_support::*;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    fn seeded() -> TestApp {
        let app = TestApp::new();
        {
            let db = app.state.db().unwrap();
            let id = db
                .insert_invoice(&platform_invoice("AM-1", "2024-03-05", Platform::Amazon, 200.0))
                .unwrap();
            db.insert_fee(
                id,
                &NewFee {
                    fee_type: FeeType::Platform,
                    amount: 30.0,
                    description: None,
                },
            )
            .unwrap();
            db.insert_invoice(&platform_invoice("EB-1", "2024-04-10", Platform::Ebay, 100.0))
                .unwrap();
        }
        app
    }

    #[tokio::test]
    async fn summary_groups_by_month_and_platform() {
        let app = seeded();
        let response = app.get("/api/platforms/summary?von=2024-01-01&bis=2024-12-31").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["months"].as_array().unwrap().len(), 2);
        assert_eq!(body["totals"]["invoiceCount"], 2);
        assert_eq!(body["totals"]["net"], 300.0);
        assert_eq!(body["totals"]["totalFees"], 30.0);
        assert_eq!(body["totals"]["profit"], 270.0);

        let amazon = body_json(
            app.get("/api/platforms/summary?von=2024-01-01&bis=2024-12-31&plattform=Amazon")
                .await,
        )
        .await;
        assert_eq!(amazon["totals"]["invoiceCount"], 1);
    }

    #[tokio::test]
    async fn reversed_range_is_400() {
        let app = seeded();
        let response = app.get("/api/platforms/summary?von=2024-12-31&bis=2024-01-01").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn detail_and_export_list_fee_rows() {
        let app = seeded();
        let detail = body_json(app.get("/api/platforms/detail?von=2024-03-01&bis=2024-03-31").await).await;
        assert_eq!(detail.as_array().unwrap().len(), 1);
        assert_eq!(detail[0]["rechnungsnummer"], "AM-1");
        assert_eq!(detail[0]["gebuehrenGesamt"], 30.0);

        let export = app.get("/api/platforms/export?von=2024-01-01&bis=2024-12-31").await;
        let disposition = export.headers()["content-disposition"].to_str().unwrap().to_string();
        assert!(disposition.contains("plattformen-20240101-20241231.csv"));
        assert_eq!(body_text(export).await.lines().count(), 3);
    }

    #[tokio::test]
    async fn detect_prefers_payment_method_and_estimates_fees() {
        let app = TestApp::new();
        let response = app
            .json(
                Method::POST,
                "/api/platforms/detect",
                json!({ "zahlungsmethode": "Shopify Payments", "lieferant": "eBay Kunde", "betragBrutto": 100.0 }),
            )
            .await;
        let body = body_json(response).await;
        assert_eq!(body["plattform"], "Shopify");
        assert_eq!(body["gebuehren"]["platformFee"], 2.0);
        assert_eq!(body["gebuehren"]["paymentFee"], 2.1);

        let nothing = body_json(
            app.json(Method::POST, "/api/platforms/detect", json!({ "lieferant": "Bäckerei Schmidt" }))
                .await,
        )
        .await;
        assert!(nothing["plattform"].is_null());
        assert!(nothing["gebuehren"].is_null());
    }
}
