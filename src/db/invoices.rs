use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result as SqlResult};

use super::{invoice_from_row, placeholders, Database, INVOICE_COLUMNS};
use crate::models::{Invoice, InvoiceFilter, InvoicePage, InvoiceStatus, NewInvoice};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

impl Database {
    pub fn insert_invoice(&self, invoice: &NewInvoice) -> SqlResult<i64> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO invoices (
                rechnungsnummer, datum, lieferant, betrag_netto, mwst_satz, mwst_betrag, betrag_brutto,
                leistungszeitraum, datei_pfad, status, typ, plattform, bestellnummer, referenz,
                zahlungsmethode, plattform_gebuehr, zahlungs_gebuehr, werbekosten, versandkosten,
                erstellt_am, aktualisiert_am
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)",
            params![
                invoice.number,
                invoice.date,
                invoice.counterparty,
                invoice.net_amount,
                invoice.vat_rate,
                invoice.vat_amount,
                invoice.gross_amount,
                invoice.service_period,
                invoice.file_path,
                invoice.status,
                invoice.direction,
                invoice.platform,
                invoice.order_number,
                invoice.reference,
                invoice.payment_method,
                invoice.platform_fee,
                invoice.payment_fee,
                invoice.ad_cost,
                invoice.shipping_cost,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replaces every column of an existing row. Returns false when the id is unknown.
    pub fn update_invoice(&self, id: i64, invoice: &NewInvoice) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE invoices SET
                rechnungsnummer = ?1, datum = ?2, lieferant = ?3, betrag_netto = ?4, mwst_satz = ?5,
                mwst_betrag = ?6, betrag_brutto = ?7, leistungszeitraum = ?8, datei_pfad = ?9,
                status = ?10, typ = ?11, plattform = ?12, bestellnummer = ?13, referenz = ?14,
                zahlungsmethode = ?15, plattform_gebuehr = ?16, zahlungs_gebuehr = ?17,
                werbekosten = ?18, versandkosten = ?19, aktualisiert_am = ?20
             WHERE id = ?21",
            params![
                invoice.number,
                invoice.date,
                invoice.counterparty,
                invoice.net_amount,
                invoice.vat_rate,
                invoice.vat_amount,
                invoice.gross_amount,
                invoice.service_period,
                invoice.file_path,
                invoice.status,
                invoice.direction,
                invoice.platform,
                invoice.order_number,
                invoice.reference,
                invoice.payment_method,
                invoice.platform_fee,
                invoice.payment_fee,
                invoice.ad_cost,
                invoice.shipping_cost,
                Utc::now(),
                id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_invoice(&self, id: i64) -> SqlResult<Option<Invoice>> {
        let sql = format!("SELECT {} FROM invoices WHERE id = ?1", INVOICE_COLUMNS);
        self.conn
            .query_row(&sql, params![id], invoice_from_row)
            .optional()
    }

    pub fn find_by_number(&self, number: &str) -> SqlResult<Option<Invoice>> {
        let sql = format!("SELECT {} FROM invoices WHERE rechnungsnummer = ?1", INVOICE_COLUMNS);
        self.conn
            .query_row(&sql, params![number.trim()], invoice_from_row)
            .optional()
    }

    pub fn list_invoices(&self, filter: &InvoiceFilter) -> SqlResult<InvoicePage> {
        let (where_sql, mut values) = filter_clause(filter);

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM invoices{}", where_sql),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        values.push(Value::Integer(page_size as i64));
        values.push(Value::Integer((i64::from(page) - 1) * i64::from(page_size)));

        let sql = format!(
            "SELECT {} FROM invoices{} ORDER BY datum DESC, id DESC LIMIT ? OFFSET ?",
            INVOICE_COLUMNS, where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), invoice_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(InvoicePage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Every invoice matching the filter, ignoring pagination. Used by CSV exports.
    pub fn all_invoices(&self, filter: &InvoiceFilter) -> SqlResult<Vec<Invoice>> {
        let (where_sql, values) = filter_clause(filter);
        let sql = format!(
            "SELECT {} FROM invoices{} ORDER BY datum ASC, id ASC",
            INVOICE_COLUMNS, where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), invoice_from_row)?;
        rows.collect()
    }

    pub fn delete_invoice(&self, id: i64) -> SqlResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM invoices WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn bulk_update_status(&self, ids: &[i64], status: InvoiceStatus) -> SqlResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE invoices SET status = ?, aktualisiert_am = ? WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut values = vec![
            Value::Text(status.as_str().to_string()),
            Value::Text(Utc::now().to_rfc3339()),
        ];
        values.extend(ids.iter().map(|id| Value::Integer(*id)));
        self.conn.execute(&sql, params_from_iter(values.iter()))
    }

    /// Sets a new VAT rate and recomputes VAT and gross from the stored net amount.
    pub fn bulk_update_vat(&self, ids: &[i64], vat_rate: f64) -> SqlResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE invoices SET
                mwst_satz = ?1,
                mwst_betrag = ROUND(betrag_netto * ?1 / 100.0, 2),
                betrag_brutto = ROUND(betrag_netto + betrag_netto * ?1 / 100.0, 2),
                aktualisiert_am = ?2
             WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut values = vec![Value::Real(vat_rate), Value::Text(Utc::now().to_rfc3339())];
        values.extend(ids.iter().map(|id| Value::Integer(*id)));
        self.conn.execute(&sql, params_from_iter(values.iter()))
    }

    pub fn bulk_delete(&self, ids: &[i64]) -> SqlResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM invoices WHERE id IN ({})", placeholders(ids.len()));
        self.conn.execute(&sql, params_from_iter(ids.iter()))
    }
}

fn filter_clause(filter: &InvoiceFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(direction) = filter.typ {
        clauses.push("typ = ?");
        values.push(Value::Text(direction.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(platform) = filter.plattform {
        clauses.push("plattform = ?");
        values.push(Value::Text(platform.as_str().to_string()));
    }
    if let Some(from) = filter.von {
        clauses.push("datum >= ?");
        values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = filter.bis {
        clauses.push("datum <= ?");
        values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        clauses.push("(rechnungsnummer LIKE ? OR lieferant LIKE ?)");
        let pattern = format!("%{}%", q);
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}
