use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::Database;
use crate::models::{Direction, ExtractedInvoice, Invoice, InvoiceStatus, NewInvoice, Platform};
use crate::services::amounts::complete_amounts;
use crate::services::archive::{extract_pdfs, PdfEntry};
use crate::services::csv_io::{read_records, RawRecord};
use crate::services::platform::{detect_platform, estimate_fees};
use crate::services::progress::ImportStatus;
use crate::services::state::AppState;
use crate::services::storage::object_key;
use crate::utils::{has_extension, parse_date};

fn default_direction() -> Direction {
    Direction::Incoming
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    #[serde(default = "default_direction")]
    pub typ: Direction,
    #[serde(default)]
    pub update_existing: bool,
    #[serde(default)]
    pub plattform: Option<Platform>,
    #[serde(default = "default_true")]
    pub estimate_fees: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            typ: default_direction(),
            update_existing: false,
            plattform: None,
            estimate_fees: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Validation,
    Duplicate,
    Extraction,
    Storage,
    Unsupported,
    Database,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportIssue {
    pub item: String,
    pub kind: IssueKind,
    pub message: String,
}

impl ImportIssue {
    fn new(item: &str, kind: IssueKind, message: impl Into<String>) -> Self {
        ImportIssue {
            item: item.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// What happened to a single row or document.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Imported(i64),
    Updated(i64),
    Skipped(ImportIssue),
    Failed(ImportIssue),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportIssue>,
    pub invoice_ids: Vec<i64>,
}

impl ImportReport {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Imported(id) => {
                self.imported += 1;
                self.invoice_ids.push(id);
            }
            Outcome::Updated(id) => {
                self.updated += 1;
                self.invoice_ids.push(id);
            }
            Outcome::Skipped(issue) => {
                self.skipped += 1;
                self.errors.push(issue);
            }
            Outcome::Failed(issue) => {
                self.failed += 1;
                self.errors.push(issue);
            }
        }
    }

    pub fn merge(&mut self, other: ImportReport) {
        self.total += other.total;
        self.imported += other.imported;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
        self.invoice_ids.extend(other.invoice_ids);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The upload as a whole is unusable (bad CSV header, ZIP without PDFs, missing field).
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ImportError {
    fn from(error: rusqlite::Error) -> Self {
        ImportError::Internal(error.into())
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Tags the invoice with a marketplace when it has none and estimates fees for
/// outgoing marketplace sales that came without fee figures.
pub fn apply_platform_rules(invoice: &mut NewInvoice, options: &ImportOptions) {
    if invoice.platform.is_none() {
        invoice.platform = options.plattform.or_else(|| {
            detect_platform(
                invoice.payment_method.as_deref(),
                invoice.order_number.as_deref(),
                invoice.reference.as_deref(),
                Some(invoice.counterparty.as_str()),
            )
        });
    }

    if !options.estimate_fees || invoice.direction != Direction::Outgoing || invoice.has_fee_figures() {
        return;
    }
    if let Some(platform) = invoice.platform {
        let estimate = estimate_fees(platform, invoice.gross_amount);
        invoice.platform_fee = Some(estimate.platform_fee);
        if estimate.payment_fee_percent > 0.0 {
            invoice.payment_fee = Some(estimate.payment_fee);
        }
    }
}

/// Inserts the invoice or, for a known invoice number, updates or skips it.
fn save_invoice(db: &Database, item: &str, mut invoice: NewInvoice, options: &ImportOptions) -> Outcome {
    invoice.number = invoice.number.trim().to_string();
    let existing = match db.find_by_number(&invoice.number) {
        Ok(existing) => existing,
        Err(e) => return Outcome::Failed(ImportIssue::new(item, IssueKind::Database, e.to_string())),
    };

    match existing {
        Some(existing) if options.update_existing => {
            if invoice.file_path.is_none() {
                invoice.file_path = existing.data.file_path.clone();
            }
            match db.update_invoice(existing.id, &invoice) {
                Ok(_) => Outcome::Updated(existing.id),
                Err(e) => Outcome::Failed(ImportIssue::new(item, IssueKind::Database, e.to_string())),
            }
        }
        Some(existing) => Outcome::Skipped(duplicate_issue(item, &existing)),
        None => match db.insert_invoice(&invoice) {
            Ok(id) => Outcome::Imported(id),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Outcome::Skipped(ImportIssue::new(
                    item,
                    IssueKind::Duplicate,
                    format!("Rechnungsnummer {} existiert bereits", invoice.number),
                ))
            }
            Err(e) => Outcome::Failed(ImportIssue::new(item, IssueKind::Database, e.to_string())),
        },
    }
}

fn duplicate_issue(item: &str, existing: &Invoice) -> ImportIssue {
    ImportIssue::new(
        item,
        IssueKind::Duplicate,
        format!(
            "Rechnungsnummer {} existiert bereits (ID {})",
            existing.data.number, existing.id
        ),
    )
}

fn import_records<F>(
    state: &AppState,
    file_name: &str,
    records: Vec<RawRecord>,
    options: &ImportOptions,
    adjust: F,
) -> Result<ImportReport, ImportError>
where
    F: Fn(&mut NewInvoice),
{
    let db = state.db()?;
    let mut report = ImportReport::default();
    for record in records {
        let item = format!("{} Zeile {}", file_name, record.line);
        let outcome = match record.to_invoice(options.typ) {
            Ok(mut invoice) => {
                adjust(&mut invoice);
                apply_platform_rules(&mut invoice, options);
                save_invoice(&db, &item, invoice, options)
            }
            Err(message) => Outcome::Failed(ImportIssue::new(&item, IssueKind::Validation, message)),
        };
        report.record(outcome);
    }
    Ok(report)
}

pub fn import_csv(
    state: &AppState,
    file_name: &str,
    bytes: &[u8],
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let records = read_records(bytes).map_err(|e| ImportError::Invalid(e.to_string()))?;
    let report = import_records(state, file_name, records, options, |_| {})?;
    tracing::info!(
        file = file_name,
        imported = report.imported,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "csv import finished"
    );
    Ok(report)
}

/// Marketplace sales export: every row becomes an outgoing invoice of the given platform.
pub fn import_platform_csv(
    state: &AppState,
    file_name: &str,
    bytes: &[u8],
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let platform = options
        .plattform
        .ok_or_else(|| ImportError::Invalid("Plattform fehlt".to_string()))?;
    let options = ImportOptions {
        typ: Direction::Outgoing,
        plattform: Some(platform),
        ..options.clone()
    };
    let records = read_records(bytes).map_err(|e| ImportError::Invalid(e.to_string()))?;
    let report = import_records(state, file_name, records, &options, |invoice| {
        invoice.direction = Direction::Outgoing;
        invoice.platform = Some(platform);
    })?;
    tracing::info!(
        file = file_name,
        %platform,
        imported = report.imported,
        failed = report.failed,
        "platform import finished"
    );
    Ok(report)
}

fn draft_from_extracted(data: ExtractedInvoice, direction: Direction) -> Result<NewInvoice, String> {
    let present = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let number = present(data.number).ok_or_else(|| "Rechnungsnummer nicht erkannt".to_string())?;
    let date = data
        .date
        .as_deref()
        .and_then(parse_date)
        .ok_or_else(|| "Rechnungsdatum nicht erkannt".to_string())?;
    let counterparty = present(data.counterparty).ok_or_else(|| "Lieferant nicht erkannt".to_string())?;
    let amounts = complete_amounts(data.net_amount, data.vat_rate, data.vat_amount, data.gross_amount)?;

    Ok(NewInvoice {
        number,
        date,
        counterparty,
        net_amount: amounts.net,
        vat_rate: amounts.vat_rate,
        vat_amount: amounts.vat,
        gross_amount: amounts.gross,
        service_period: present(data.service_period),
        file_path: None,
        status: InvoiceStatus::Open,
        direction,
        platform: None,
        order_number: present(data.order_number),
        reference: None,
        payment_method: present(data.payment_method),
        platform_fee: None,
        payment_fee: None,
        ad_cost: None,
        shipping_cost: None,
    })
}

/// Extracts, validates, stores and saves one PDF. Failures are reported, never raised.
pub async fn process_pdf(
    state: &AppState,
    file_name: &str,
    bytes: Vec<u8>,
    options: &ImportOptions,
) -> Outcome {
    let extracted = match state.extractor.extract(file_name, &bytes).await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(file = file_name, error = %e, "extraction failed");
            return Outcome::Failed(ImportIssue::new(file_name, IssueKind::Extraction, format!("{:#}", e)));
        }
    };

    let mut invoice = match draft_from_extracted(extracted, options.typ) {
        Ok(invoice) => invoice,
        Err(message) => return Outcome::Failed(ImportIssue::new(file_name, IssueKind::Validation, message)),
    };
    apply_platform_rules(&mut invoice, options);

    if !options.update_existing {
        let existing = state.db().and_then(|db| Ok(db.find_by_number(&invoice.number)?));
        match existing {
            Ok(Some(existing)) => return Outcome::Skipped(duplicate_issue(file_name, &existing)),
            Ok(None) => {}
            Err(e) => return Outcome::Failed(ImportIssue::new(file_name, IssueKind::Database, e.to_string())),
        }
    }

    let key = object_key(invoice.direction, invoice.date, file_name, &bytes);
    match state.storage.put(&key, bytes, "application/pdf").await {
        Ok(path) => invoice.file_path = Some(path),
        Err(e) => {
            return Outcome::Failed(ImportIssue::new(file_name, IssueKind::Storage, format!("{:#}", e)));
        }
    }

    match state.db() {
        Ok(db) => save_invoice(&db, file_name, invoice, options),
        Err(e) => Outcome::Failed(ImportIssue::new(file_name, IssueKind::Database, e.to_string())),
    }
}

async fn unpack_zip(state: &AppState, bytes: Vec<u8>) -> Result<Vec<PdfEntry>, ImportError> {
    let limit = state.config.max_upload_bytes as u64;
    tokio::task::spawn_blocking(move || extract_pdfs(&bytes, limit))
        .await
        .map_err(|e| ImportError::Internal(anyhow!("ZIP-Verarbeitung abgebrochen: {}", e)))?
        .map_err(|e| ImportError::Invalid(e.to_string()))
}

/// Processes every PDF of the archive within the request.
pub async fn import_zip(
    state: &AppState,
    file_name: &str,
    bytes: Vec<u8>,
    options: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let pdfs = unpack_zip(state, bytes).await?;
    let mut report = ImportReport::default();
    for entry in pdfs {
        let outcome = process_pdf(state, &entry.name, entry.bytes, options).await;
        report.record(outcome);
    }
    tracing::info!(
        file = file_name,
        total = report.total,
        imported = report.imported,
        failed = report.failed,
        "zip import finished"
    );
    Ok(report)
}

/// Registers a background import and returns its id together with the PDF count.
pub async fn start_zip_import(
    state: &AppState,
    bytes: Vec<u8>,
    options: ImportOptions,
) -> Result<(String, usize), ImportError> {
    let pdfs = unpack_zip(state, bytes).await?;
    let import_id = uuid::Uuid::new_v4().to_string();
    let total = pdfs.len();
    state.progress.register(&import_id, total);
    tracing::info!(import_id = %import_id, total, "zip import started");

    state.progress.supervise(
        import_id.clone(),
        state.config.import_progress_ttl,
        run_zip_import(state.clone(), import_id.clone(), pdfs, options),
    );
    Ok((import_id, total))
}

/// Works through the PDFs in batches, pausing between batches to spare the extraction API.
pub async fn run_zip_import(state: AppState, import_id: String, pdfs: Vec<PdfEntry>, options: ImportOptions) {
    let batch_size = state.config.import_batch_size.max(1);
    let delay = state.config.import_batch_delay;

    for (index, entry) in pdfs.into_iter().enumerate() {
        if index > 0 && index % batch_size == 0 && delay > Duration::ZERO {
            tracing::debug!(import_id = %import_id, processed = index, "batch done, pausing");
            tokio::time::sleep(delay).await;
        }
        let name = entry.name.clone();
        state
            .progress
            .update(&import_id, |p| p.current_file = Some(name.clone()));

        let outcome = process_pdf(&state, &entry.name, entry.bytes, &options).await;
        state.progress.update(&import_id, |p| {
            p.processed += 1;
            match outcome {
                Outcome::Imported(id) | Outcome::Updated(id) => {
                    p.successful += 1;
                    p.invoice_ids.push(id);
                }
                Outcome::Skipped(issue) => {
                    p.skipped += 1;
                    p.errors.push(issue);
                }
                Outcome::Failed(issue) => {
                    p.failed += 1;
                    p.errors.push(issue);
                }
            }
        });
    }

    state.progress.finish(&import_id, ImportStatus::Completed);
    if let Some(done) = state.progress.snapshot(&import_id) {
        tracing::info!(
            import_id = %import_id,
            successful = done.successful,
            skipped = done.skipped,
            failed = done.failed,
            "zip import completed"
        );
    }
    state
        .progress
        .schedule_cleanup(import_id, state.config.import_progress_ttl);
}

/// Mixed upload: each file is handled by its extension.
pub async fn import_unified(state: &AppState, files: Vec<UploadedFile>, options: &ImportOptions) -> ImportReport {
    let mut report = ImportReport::default();
    for file in files {
        let name = file.name.clone();
        if has_extension(&name, "csv") {
            match import_csv(state, &name, &file.bytes, options) {
                Ok(sub) => report.merge(sub),
                Err(e) => report.record(file_failure(&name, e)),
            }
        } else if has_extension(&name, "pdf") {
            let outcome = process_pdf(state, &name, file.bytes, options).await;
            report.record(outcome);
        } else if has_extension(&name, "zip") {
            match import_zip(state, &name, file.bytes, options).await {
                Ok(sub) => report.merge(sub),
                Err(e) => report.record(file_failure(&name, e)),
            }
        } else {
            report.record(Outcome::Failed(ImportIssue::new(
                &name,
                IssueKind::Unsupported,
                "Nicht unterstützter Dateityp (erlaubt: csv, pdf, zip)",
            )));
        }
    }
    report
}

fn file_failure(name: &str, error: ImportError) -> Outcome {
    let kind = match &error {
        ImportError::Invalid(_) => IssueKind::Validation,
        ImportError::Duplicate(_) => IssueKind::Duplicate,
        ImportError::Storage(_) => IssueKind::Storage,
        ImportError::Internal(_) => IssueKind::Database,
    };
    Outcome::Failed(ImportIssue::new(name, kind, error.to_string()))
}

/// Manual entry: form fields named like the CSV columns plus an optional document.
pub async fn upload_invoice(
    state: &AppState,
    record: RawRecord,
    file: Option<UploadedFile>,
    options: &ImportOptions,
) -> Result<Invoice, ImportError> {
    let mut invoice = record.to_invoice(options.typ).map_err(ImportError::Invalid)?;
    apply_platform_rules(&mut invoice, options);

    let existing = {
        let db = state.db()?;
        db.find_by_number(&invoice.number)?
    };
    if let (Some(existing), false) = (&existing, options.update_existing) {
        return Err(ImportError::Duplicate(duplicate_issue("upload", existing).message));
    }

    if let Some(file) = file {
        let key = object_key(invoice.direction, invoice.date, &file.name, &file.bytes);
        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let path = state
            .storage
            .put(&key, file.bytes, &content_type)
            .await
            .map_err(|e| ImportError::Storage(format!("{:#}", e)))?;
        invoice.file_path = Some(path);
    }

    let db = state.db()?;
    let id = match existing {
        Some(existing) => {
            if invoice.file_path.is_none() {
                invoice.file_path = existing.data.file_path.clone();
            }
            db.update_invoice(existing.id, &invoice)?;
            existing.id
        }
        None => db.insert_invoice(&invoice)?,
    };
    let saved = db
        .get_invoice(id)?
        .ok_or_else(|| ImportError::Internal(anyhow!("Rechnung {} nach dem Speichern nicht gefunden", id)))?;
    tracing::info!(id, number = %saved.data.number, "invoice uploaded");
    Ok(saved)
}
