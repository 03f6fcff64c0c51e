use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::models::{Direction, Fee, Invoice, InvoiceFilter, InvoicePage, InvoiceStatus, NewInvoice, Platform};
use crate::routes::{csv_response, FormData};
use crate::services::amounts::complete_amounts;
use crate::services::csv_io::{self, RawRecord};
use crate::services::processor::{apply_platform_rules, upload_invoice, ImportOptions};
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/invoices", get(list_invoices).post(create_invoice))
        .route("/api/invoices/upload", post(upload))
        .route("/api/invoices/bulk/status", post(bulk_status))
        .route("/api/invoices/bulk/vat", post(bulk_vat))
        .route("/api/invoices/bulk/delete", post(bulk_delete))
        .route("/api/invoices/export", get(export_invoices))
        .route("/api/invoices/template", get(template))
        .route(
            "/api/invoices/{id}",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
}

/// JSON body for create and update. Missing amounts are derived.
#[derive(Debug, Deserialize)]
pub struct InvoiceInput {
    pub rechnungsnummer: String,
    pub datum: NaiveDate,
    pub lieferant: String,
    #[serde(rename = "betragNetto", default)]
    pub betrag_netto: Option<f64>,
    #[serde(rename = "mwstSatz", default)]
    pub mwst_satz: Option<f64>,
    #[serde(rename = "mwstBetrag", default)]
    pub mwst_betrag: Option<f64>,
    #[serde(rename = "betragBrutto", default)]
    pub betrag_brutto: Option<f64>,
    #[serde(default)]
    pub leistungszeitraum: Option<String>,
    #[serde(rename = "dateiPfad", default)]
    pub datei_pfad: Option<String>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub typ: Option<Direction>,
    #[serde(default)]
    pub plattform: Option<Platform>,
    #[serde(default)]
    pub bestellnummer: Option<String>,
    #[serde(default)]
    pub referenz: Option<String>,
    #[serde(default)]
    pub zahlungsmethode: Option<String>,
    #[serde(rename = "plattformGebuehr", default)]
    pub plattform_gebuehr: Option<f64>,
    #[serde(rename = "zahlungsGebuehr", default)]
    pub zahlungs_gebuehr: Option<f64>,
    #[serde(default)]
    pub werbekosten: Option<f64>,
    #[serde(default)]
    pub versandkosten: Option<f64>,
}

impl InvoiceInput {
    fn into_invoice(self) -> Result<NewInvoice, ApiError> {
        let number = self.rechnungsnummer.trim().to_string();
        if number.is_empty() {
            return Err(ApiError::BadRequest("Rechnungsnummer fehlt".to_string()));
        }
        let counterparty = self.lieferant.trim().to_string();
        if counterparty.is_empty() {
            return Err(ApiError::BadRequest("Lieferant fehlt".to_string()));
        }
        let amounts = complete_amounts(self.betrag_netto, self.mwst_satz, self.mwst_betrag, self.betrag_brutto)
            .map_err(ApiError::BadRequest)?;

        Ok(NewInvoice {
            number,
            date: self.datum,
            counterparty,
            net_amount: amounts.net,
            vat_rate: amounts.vat_rate,
            vat_amount: amounts.vat,
            gross_amount: amounts.gross,
            service_period: self.leistungszeitraum,
            file_path: self.datei_pfad,
            status: self.status.unwrap_or_default(),
            direction: self.typ.unwrap_or(Direction::Incoming),
            platform: self.plattform,
            order_number: self.bestellnummer,
            reference: self.referenz,
            payment_method: self.zahlungsmethode,
            platform_fee: self.plattform_gebuehr,
            payment_fee: self.zahlungs_gebuehr,
            ad_cost: self.werbekosten,
            shipping_cost: self.versandkosten,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    #[serde(rename = "gebuehren")]
    pub fees: Vec<Fee>,
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceFilter>,
) -> Result<Json<InvoicePage>, ApiError> {
    let db = state.db()?;
    Ok(Json(db.list_invoices(&filter)?))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(input): Json<InvoiceInput>,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let mut invoice = input.into_invoice()?;
    let options = ImportOptions {
        typ: invoice.direction,
        ..Default::default()
    };
    apply_platform_rules(&mut invoice, &options);

    let db = state.db()?;
    if db.find_by_number(&invoice.number)?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Rechnungsnummer {} existiert bereits",
            invoice.number
        )));
    }
    let id = db.insert_invoice(&invoice)?;
    let created = db
        .get_invoice(id)?
        .ok_or_else(|| ApiError::not_found("Rechnung", id))?;
    tracing::info!(id, number = %created.data.number, "invoice created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceDetail>, ApiError> {
    let db = state.db()?;
    let invoice = db
        .get_invoice(id)?
        .ok_or_else(|| ApiError::not_found("Rechnung", id))?;
    let fees = db.fees_for_invoice(id)?;
    Ok(Json(InvoiceDetail { invoice, fees }))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<InvoiceInput>,
) -> Result<Json<Invoice>, ApiError> {
    let mut invoice = input.into_invoice()?;
    let db = state.db()?;
    let existing = db
        .get_invoice(id)?
        .ok_or_else(|| ApiError::not_found("Rechnung", id))?;
    if invoice.file_path.is_none() {
        invoice.file_path = existing.data.file_path;
    }
    if let Some(other) = db.find_by_number(&invoice.number)? {
        if other.id != id {
            return Err(ApiError::Conflict(format!(
                "Rechnungsnummer {} gehört zu Rechnung {}",
                invoice.number, other.id
            )));
        }
    }
    db.update_invoice(id, &invoice)?;
    let updated = db
        .get_invoice(id)?
        .ok_or_else(|| ApiError::not_found("Rechnung", id))?;
    Ok(Json(updated))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let db = state.db()?;
    if !db.delete_invoice(id)? {
        return Err(ApiError::not_found("Rechnung", id));
    }
    tracing::info!(id, "invoice deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Manual entry as multipart: form fields named like the CSV columns plus an optional file.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Invoice>), ApiError> {
    let mut form = FormData::read(multipart).await?;
    let mut options = ImportOptions::default();
    form.apply_options(&mut options)?;

    let mut record = RawRecord::default();
    for (name, value) in &form.fields {
        record.insert(name, value);
    }
    let file = if form.files.is_empty() {
        None
    } else {
        Some(form.files.swap_remove(0))
    };

    let invoice = upload_invoice(&state, record, file, &options).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

fn require_ids(ids: &[i64]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ApiError::BadRequest("Keine Rechnungen ausgewählt".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub ids: Vec<i64>,
    pub status: InvoiceStatus,
}

pub async fn bulk_status(
    State(state): State<AppState>,
    Json(request): Json<BulkStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_ids(&request.ids)?;
    let updated = state.db()?.bulk_update_status(&request.ids, request.status)?;
    tracing::info!(requested = request.ids.len(), updated, status = request.status.as_str(), "bulk status");
    Ok(Json(json!({ "updatedCount": updated })))
}

#[derive(Debug, Deserialize)]
pub struct BulkVatRequest {
    pub ids: Vec<i64>,
    #[serde(rename = "mwstSatz")]
    pub vat_rate: f64,
}

/// Sets the VAT rate and recomputes VAT and gross from net.
pub async fn bulk_vat(
    State(state): State<AppState>,
    Json(request): Json<BulkVatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_ids(&request.ids)?;
    if !(0.0..=100.0).contains(&request.vat_rate) {
        return Err(ApiError::BadRequest(format!(
            "Ungültiger MwSt-Satz: {}",
            request.vat_rate
        )));
    }
    let updated = state.db()?.bulk_update_vat(&request.ids, request.vat_rate)?;
    Ok(Json(json!({ "updatedCount": updated })))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<i64>,
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_ids(&request.ids)?;
    let deleted = state.db()?.bulk_delete(&request.ids)?;
    tracing::info!(requested = request.ids.len(), deleted, "bulk delete");
    Ok(Json(json!({ "deletedCount": deleted })))
}

pub async fn export_invoices(
    State(state): State<AppState>,
    Query(filter): Query<InvoiceFilter>,
) -> Result<Response, ApiError> {
    let invoices = state.db()?.all_invoices(&filter)?;
    let bytes = csv_io::write_invoices(&invoices)?;
    Ok(csv_response("rechnungen.csv", bytes))
}

pub async fn template() -> Result<Response, ApiError> {
    Ok(csv_response("rechnungen-vorlage.csv", csv_io::template()?))
}
