use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Result as SqlResult};
use serde::Serialize;

use super::Database;
use crate::models::{Direction, FeeType, InvoiceStatus, InvoiceSummary, Platform};

/// Outgoing marketplace invoices of one month and platform, summed.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyTotalsRow {
    pub month: String,
    pub platform: Platform,
    pub invoice_count: i64,
    pub gross: f64,
    pub net: f64,
    pub vat: f64,
    pub platform_fees: f64,
    pub payment_fees: f64,
    pub ad_costs: f64,
    pub shipping_costs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeTotalsRow {
    pub month: String,
    pub platform: Platform,
    pub fee_type: FeeType,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdCostTotalsRow {
    pub month: String,
    pub platform: Platform,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyRow {
    pub id: i64,
    pub rechnungsnummer: String,
    pub betrag_netto: f64,
    pub mwst_betrag: f64,
    pub betrag_brutto: f64,
    pub differenz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledSums {
    pub checked: i64,
    pub sum_netto: f64,
    pub sum_mwst: f64,
    pub sum_brutto: f64,
}

fn date_values(from: NaiveDate, to: NaiveDate) -> Vec<Value> {
    vec![
        Value::Text(from.format("%Y-%m-%d").to_string()),
        Value::Text(to.format("%Y-%m-%d").to_string()),
    ]
}

impl Database {
    pub fn monthly_platform_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        platform: Option<Platform>,
    ) -> SqlResult<Vec<MonthlyTotalsRow>> {
        let mut values = date_values(from, to);
        let platform_sql = match platform {
            Some(p) => {
                values.push(Value::Text(p.as_str().to_string()));
                " AND plattform = ?"
            }
            None => "",
        };
        let sql = format!(
            "SELECT substr(datum, 1, 7) AS monat, plattform, COUNT(*),
                    TOTAL(betrag_brutto), TOTAL(betrag_netto), TOTAL(mwst_betrag),
                    TOTAL(plattform_gebuehr), TOTAL(zahlungs_gebuehr), TOTAL(werbekosten),
                    TOTAL(versandkosten)
             FROM invoices
             WHERE typ = 'ausgang' AND plattform IS NOT NULL AND status != 'Storniert'
               AND datum >= ? AND datum <= ?{}
             GROUP BY monat, plattform
             ORDER BY monat, plattform",
            platform_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(MonthlyTotalsRow {
                month: row.get(0)?,
                platform: row.get(1)?,
                invoice_count: row.get(2)?,
                gross: row.get(3)?,
                net: row.get(4)?,
                vat: row.get(5)?,
                platform_fees: row.get(6)?,
                payment_fees: row.get(7)?,
                ad_costs: row.get(8)?,
                shipping_costs: row.get(9)?,
            })
        })?;
        rows.collect()
    }

    pub fn monthly_fee_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        platform: Option<Platform>,
    ) -> SqlResult<Vec<FeeTotalsRow>> {
        let mut values = date_values(from, to);
        let platform_sql = match platform {
            Some(p) => {
                values.push(Value::Text(p.as_str().to_string()));
                " AND i.plattform = ?"
            }
            None => "",
        };
        let sql = format!(
            "SELECT substr(i.datum, 1, 7) AS monat, i.plattform, f.gebuehr_typ, TOTAL(f.betrag)
             FROM fees f JOIN invoices i ON i.id = f.rechnung_id
             WHERE i.typ = 'ausgang' AND i.plattform IS NOT NULL AND i.status != 'Storniert'
               AND i.datum >= ? AND i.datum <= ?{}
             GROUP BY monat, i.plattform, f.gebuehr_typ",
            platform_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(FeeTotalsRow {
                month: row.get(0)?,
                platform: row.get(1)?,
                fee_type: row.get(2)?,
                total: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    pub fn monthly_ad_cost_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        platform: Option<Platform>,
    ) -> SqlResult<Vec<AdCostTotalsRow>> {
        let mut values = date_values(from, to);
        let platform_sql = match platform {
            Some(p) => {
                values.push(Value::Text(p.as_str().to_string()));
                " AND plattform = ?"
            }
            None => "",
        };
        let sql = format!(
            "SELECT substr(datum, 1, 7) AS monat, plattform, TOTAL(betrag)
             FROM ad_costs
             WHERE datum >= ? AND datum <= ?{}
             GROUP BY monat, plattform",
            platform_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(AdCostTotalsRow {
                month: row.get(0)?,
                platform: row.get(1)?,
                total: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn get_monthly_sum(&self, direction: Direction, year_month: &str) -> SqlResult<f64> {
        self.conn.query_row(
            "SELECT TOTAL(betrag_brutto) FROM invoices
             WHERE typ = ?1 AND status != 'Storniert' AND substr(datum, 1, 7) = ?2",
            params![direction, year_month],
            |row| row.get(0),
        )
    }

    pub fn get_yearly_sum(&self, direction: Direction, year: &str) -> SqlResult<f64> {
        self.conn.query_row(
            "SELECT TOTAL(betrag_brutto) FROM invoices
             WHERE typ = ?1 AND status != 'Storniert' AND substr(datum, 1, 4) = ?2",
            params![direction, year],
            |row| row.get(0),
        )
    }

    pub fn get_open_expenses_total(&self) -> SqlResult<f64> {
        self.conn.query_row(
            "SELECT TOTAL(betrag_brutto) FROM invoices
             WHERE typ = 'eingang' AND status IN ('Offen', 'Überfällig')",
            [],
            |row| row.get(0),
        )
    }

    pub fn get_recent_invoices(
        &self,
        direction: Direction,
        limit: usize,
    ) -> SqlResult<Vec<InvoiceSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rechnungsnummer, datum, lieferant, betrag_brutto, status
             FROM invoices
             WHERE typ = ?1
             ORDER BY datum DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![direction, limit as i64], |row| {
            Ok(InvoiceSummary {
                id: row.get(0)?,
                rechnungsnummer: row.get(1)?,
                datum: row.get(2)?,
                lieferant: row.get(3)?,
                betrag_brutto: row.get(4)?,
                status: row.get::<_, InvoiceStatus>(5)?,
            })
        })?;

        rows.collect()
    }

    /// Rows whose net plus VAT differs from gross by more than a cent.
    pub fn inconsistent_invoices(&self) -> SqlResult<Vec<ConsistencyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rechnungsnummer, betrag_netto, mwst_betrag, betrag_brutto,
                    ROUND(betrag_netto + mwst_betrag - betrag_brutto, 2) AS differenz
             FROM invoices
             WHERE ABS(betrag_netto + mwst_betrag - betrag_brutto) > 0.01
             ORDER BY ABS(betrag_netto + mwst_betrag - betrag_brutto) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ConsistencyRow {
                id: row.get(0)?,
                rechnungsnummer: row.get(1)?,
                betrag_netto: row.get(2)?,
                mwst_betrag: row.get(3)?,
                betrag_brutto: row.get(4)?,
                differenz: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn reconciled_sums(&self) -> SqlResult<ReconciledSums> {
        self.conn.query_row(
            "SELECT COUNT(*), TOTAL(betrag_netto), TOTAL(mwst_betrag), TOTAL(betrag_brutto) FROM invoices",
            [],
            |row| {
                Ok(ReconciledSums {
                    checked: row.get(0)?,
                    sum_netto: row.get(1)?,
                    sum_mwst: row.get(2)?,
                    sum_brutto: row.get(3)?,
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_fixtures::{invoice, platform_invoice};
    use crate::models::NewFee;

    fn ymd(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn platform_totals_group_by_month_and_platform() {
        let db = Database::open_in_memory().unwrap();
        let mut first = platform_invoice("EB-1", "2024-01-05", Platform::Ebay, 100.0);
        first.platform_fee = Some(11.0);
        db.insert_invoice(&first).unwrap();
        db.insert_invoice(&platform_invoice("EB-2", "2024-01-25", Platform::Ebay, 50.0))
            .unwrap();
        db.insert_invoice(&platform_invoice("AM-1", "2024-02-01", Platform::Amazon, 80.0))
            .unwrap();
        db.insert_invoice(&invoice("E-1", "2024-01-05", Direction::Incoming, 999.0))
            .unwrap();

        let rows = db
            .monthly_platform_totals(ymd("2024-01-01"), ymd("2024-12-31"), None)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].month, "2024-01");
        assert_eq!(rows[0].platform, Platform::Ebay);
        assert_eq!(rows[0].invoice_count, 2);
        assert_eq!(rows[0].net, 150.0);
        assert_eq!(rows[0].platform_fees, 11.0);

        let amazon_only = db
            .monthly_platform_totals(ymd("2024-01-01"), ymd("2024-12-31"), Some(Platform::Amazon))
            .unwrap();
        assert_eq!(amazon_only.len(), 1);
        assert_eq!(amazon_only[0].month, "2024-02");
    }

    #[test]
    fn platform_reports_leave_out_cancelled_invoices() {
        let db = Database::open_in_memory().unwrap();
        db.insert_invoice(&platform_invoice("EB-1", "2024-05-02", Platform::Ebay, 100.0))
            .unwrap();
        let mut cancelled = platform_invoice("EB-2", "2024-05-03", Platform::Ebay, 400.0);
        cancelled.status = InvoiceStatus::Cancelled;
        let cancelled_id = db.insert_invoice(&cancelled).unwrap();
        db.insert_fee(
            cancelled_id,
            &NewFee {
                fee_type: FeeType::Platform,
                amount: 40.0,
                description: None,
            },
        )
        .unwrap();

        let rows = db
            .monthly_platform_totals(ymd("2024-05-01"), ymd("2024-05-31"), None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_count, 1);
        assert_eq!(rows[0].net, 100.0);

        let fees = db
            .monthly_fee_totals(ymd("2024-05-01"), ymd("2024-05-31"), None)
            .unwrap();
        assert!(fees.is_empty());
    }

    #[test]
    fn fee_totals_are_grouped_by_type() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .insert_invoice(&platform_invoice("SH-1", "2024-03-05", Platform::Shopify, 100.0))
            .unwrap();
        for amount in [1.5, 2.5] {
            db.insert_fee(
                id,
                &NewFee {
                    fee_type: FeeType::Payment,
                    amount,
                    description: None,
                },
            )
            .unwrap();
        }
        let rows = db
            .monthly_fee_totals(ymd("2024-03-01"), ymd("2024-03-31"), None)
            .unwrap();
        assert_eq!(
            rows,
            vec![FeeTotalsRow {
                month: "2024-03".to_string(),
                platform: Platform::Shopify,
                fee_type: FeeType::Payment,
                total: 4.0,
            }]
        );
    }

    #[test]
    fn dashboard_sums_skip_cancelled_invoices() {
        let db = Database::open_in_memory().unwrap();
        db.insert_invoice(&invoice("A-1", "2024-06-01", Direction::Outgoing, 100.0))
            .unwrap();
        let mut cancelled = invoice("A-2", "2024-06-02", Direction::Outgoing, 100.0);
        cancelled.status = InvoiceStatus::Cancelled;
        db.insert_invoice(&cancelled).unwrap();
        db.insert_invoice(&invoice("E-1", "2024-06-03", Direction::Incoming, 10.0))
            .unwrap();

        assert_eq!(db.get_monthly_sum(Direction::Outgoing, "2024-06").unwrap(), 119.0);
        assert_eq!(db.get_yearly_sum(Direction::Outgoing, "2024").unwrap(), 119.0);
        assert_eq!(db.get_monthly_sum(Direction::Outgoing, "2024-07").unwrap(), 0.0);
        assert_eq!(db.get_open_expenses_total().unwrap(), 11.9);
        let recent = db.get_recent_invoices(Direction::Outgoing, 5).unwrap();
        assert_eq!(recent[0].rechnungsnummer, "A-2");
    }

    #[test]
    fn reports_rows_where_net_plus_vat_is_not_gross() {
        let db = Database::open_in_memory().unwrap();
        db.insert_invoice(&invoice("OK-1", "2024-01-01", Direction::Incoming, 100.0))
            .unwrap();
        let mut broken = invoice("BAD-1", "2024-01-01", Direction::Incoming, 100.0);
        broken.gross_amount = 120.0;
        db.insert_invoice(&broken).unwrap();

        let rows = db.inconsistent_invoices().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rechnungsnummer, "BAD-1");
        assert_eq!(rows[0].differenz, -1.0);

        let sums = db.reconciled_sums().unwrap();
        assert_eq!(sums.checked, 2);
        assert_eq!(sums.sum_brutto, 239.0);
    }
}
