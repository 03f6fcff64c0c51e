mod fees;
mod invoices;
mod reports;
mod users;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;

use crate::models::{Invoice, NewInvoice};

pub use reports::{AdCostTotalsRow, ConsistencyRow, FeeTotalsRow, MonthlyTotalsRow, ReconciledSums};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_invoices.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/001_create_invoices.sql")),
    ),
    (
        "002_create_fees_and_ad_costs.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/002_create_fees_and_ad_costs.sql"
        )),
    ),
    (
        "003_create_users.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/003_create_users.sql")),
    ),
];

const INVOICE_COLUMNS: &str = "id, rechnungsnummer, datum, lieferant, betrag_netto, mwst_satz, mwst_betrag,
    betrag_brutto, leistungszeitraum, datei_pfad, status, typ, plattform, bestellnummer, referenz,
    zahlungsmethode, plattform_gebuehr, zahlungs_gebuehr, werbekosten, versandkosten,
    erstellt_am, aktualisiert_am";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: impl AsRef<Path>) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        for (name, sql) in MIGRATIONS {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
                tracing::info!(migration = name, "applied migration");
            }
        }

        Ok(())
    }
}

fn invoice_from_row(row: &Row<'_>) -> SqlResult<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        data: NewInvoice {
            number: row.get(1)?,
            date: row.get(2)?,
            counterparty: row.get(3)?,
            net_amount: row.get(4)?,
            vat_rate: row.get(5)?,
            vat_amount: row.get(6)?,
            gross_amount: row.get(7)?,
            service_period: row.get(8)?,
            file_path: row.get(9)?,
            status: row.get(10)?,
            direction: row.get(11)?,
            platform: row.get(12)?,
            order_number: row.get(13)?,
            reference: row.get(14)?,
            payment_method: row.get(15)?,
            platform_fee: row.get(16)?,
            payment_fee: row.get(17)?,
            ad_cost: row.get(18)?,
            shipping_cost: row.get(19)?,
        },
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

/// `?,?,?` for an `IN (...)` list of the given length.
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use chrono::NaiveDate;

    use crate::models::{Direction, InvoiceStatus, NewInvoice, Platform};

    pub fn invoice(number: &str, date: &str, direction: Direction, net: f64) -> NewInvoice {
        NewInvoice {
            number: number.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            counterparty: "Muster GmbH".to_string(),
            net_amount: net,
            vat_rate: 19.0,
            vat_amount: crate::utils::round_cents(net * 0.19),
            gross_amount: crate::utils::round_cents(net * 1.19),
            service_period: None,
            file_path: None,
            status: InvoiceStatus::Open,
            direction,
            platform: None,
            order_number: None,
            reference: None,
            payment_method: None,
            platform_fee: None,
            payment_fee: None,
            ad_cost: None,
            shipping_cost: None,
        }
    }

    pub fn platform_invoice(number: &str, date: &str, platform: Platform, net: f64) -> NewInvoice {
        let mut inv = invoice(number, date, Direction::Outgoing, net);
        inv.platform = Some(platform);
        inv
    }
}
