use anyhow::{anyhow, Result};
use chrono::{Datelike, Local, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::db::{ConsistencyRow, Database, ReconciledSums};
use crate::models::{DashboardStats, Direction, Fee, FeeType, Invoice, InvoiceFilter, Platform};
use crate::services::csv_io::write_table;
use crate::utils::{format_german_date, format_german_decimal, round_cents};

/// `von`/`bis` query range; both default to the bounds of the current year.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub von: Option<NaiveDate>,
    #[serde(default)]
    pub bis: Option<NaiveDate>,
    #[serde(default)]
    pub plattform: Option<Platform>,
}

impl ReportQuery {
    pub fn range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let year = Local::now().year();
        let from = match self.von {
            Some(date) => date,
            None => NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| anyhow!("Ungültiges Jahr"))?,
        };
        let to = match self.bis {
            Some(date) => date,
            None => NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(|| anyhow!("Ungültiges Jahr"))?,
        };
        if from > to {
            return Err(anyhow!("'von' liegt nach 'bis'"));
        }
        Ok((from, to))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformTotals {
    pub invoice_count: i64,
    pub gross: f64,
    pub net: f64,
    pub vat: f64,
    pub platform_fees: f64,
    pub payment_fees: f64,
    pub ad_costs: f64,
    pub shipping_costs: f64,
    pub other_fees: f64,
    pub total_fees: f64,
    pub profit: f64,
    /// Profit in percent of net revenue, 0 without revenue.
    pub margin: f64,
}

impl PlatformTotals {
    fn add(&mut self, other: &PlatformTotals) {
        self.invoice_count += other.invoice_count;
        self.gross += other.gross;
        self.net += other.net;
        self.vat += other.vat;
        self.platform_fees += other.platform_fees;
        self.payment_fees += other.payment_fees;
        self.ad_costs += other.ad_costs;
        self.shipping_costs += other.shipping_costs;
        self.other_fees += other.other_fees;
    }

    fn add_fee(&mut self, fee_type: FeeType, amount: f64) {
        match fee_type {
            FeeType::Platform => self.platform_fees += amount,
            FeeType::Payment => self.payment_fees += amount,
            FeeType::Advertising => self.ad_costs += amount,
            FeeType::Shipping => self.shipping_costs += amount,
            FeeType::Other => self.other_fees += amount,
        }
    }

    fn finalize(mut self) -> Self {
        for value in [
            &mut self.gross,
            &mut self.net,
            &mut self.vat,
            &mut self.platform_fees,
            &mut self.payment_fees,
            &mut self.ad_costs,
            &mut self.shipping_costs,
            &mut self.other_fees,
        ] {
            *value = round_cents(*value);
        }
        self.total_fees = round_cents(
            self.platform_fees + self.payment_fees + self.ad_costs + self.shipping_costs + self.other_fees,
        );
        self.profit = round_cents(self.net - self.total_fees);
        self.margin = if self.net == 0.0 {
            0.0
        } else {
            round_cents(self.profit / self.net * 100.0)
        };
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    pub month: String,
    pub platform: Platform,
    #[serde(flatten)]
    pub totals: PlatformTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBucket {
    pub platform: Platform,
    #[serde(flatten)]
    pub totals: PlatformTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSummary {
    pub von: NaiveDate,
    pub bis: NaiveDate,
    pub plattform: Option<Platform>,
    pub months: Vec<MonthBucket>,
    pub platforms: Vec<PlatformBucket>,
    pub totals: PlatformTotals,
}

/// Monthly revenue and cost picture of the marketplace sales in `[from, to]`.
///
/// Costs come from three places: the fee columns on the invoice, fee rows attached
/// to the invoice and separately booked ad costs.
pub fn platform_summary(
    db: &Database,
    from: NaiveDate,
    to: NaiveDate,
    platform: Option<Platform>,
) -> Result<PlatformSummary> {
    let mut buckets: BTreeMap<(String, Platform), PlatformTotals> = BTreeMap::new();

    for row in db.monthly_platform_totals(from, to, platform)? {
        let bucket = buckets.entry((row.month, row.platform)).or_default();
        bucket.invoice_count += row.invoice_count;
        bucket.gross += row.gross;
        bucket.net += row.net;
        bucket.vat += row.vat;
        bucket.platform_fees += row.platform_fees;
        bucket.payment_fees += row.payment_fees;
        bucket.ad_costs += row.ad_costs;
        bucket.shipping_costs += row.shipping_costs;
    }
    for row in db.monthly_fee_totals(from, to, platform)? {
        buckets
            .entry((row.month, row.platform))
            .or_default()
            .add_fee(row.fee_type, row.total);
    }
    for row in db.monthly_ad_cost_totals(from, to, platform)? {
        buckets.entry((row.month, row.platform)).or_default().ad_costs += row.total;
    }

    let mut per_platform: BTreeMap<Platform, PlatformTotals> = BTreeMap::new();
    let mut overall = PlatformTotals::default();
    let mut months = Vec::with_capacity(buckets.len());
    for ((month, bucket_platform), totals) in buckets {
        per_platform.entry(bucket_platform).or_default().add(&totals);
        overall.add(&totals);
        months.push(MonthBucket {
            month,
            platform: bucket_platform,
            totals: totals.finalize(),
        });
    }

    Ok(PlatformSummary {
        von: from,
        bis: to,
        plattform: platform,
        months,
        platforms: per_platform
            .into_iter()
            .map(|(platform, totals)| PlatformBucket {
                platform,
                totals: totals.finalize(),
            })
            .collect(),
        totals: overall.finalize(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDetailRow {
    #[serde(flatten)]
    pub invoice: Invoice,
    #[serde(rename = "gebuehren")]
    pub fees: Vec<Fee>,
    #[serde(rename = "gebuehrenGesamt")]
    pub fee_total: f64,
}

/// Outgoing marketplace invoices of the range with their attached fee rows.
pub fn platform_detail(
    db: &Database,
    from: NaiveDate,
    to: NaiveDate,
    platform: Option<Platform>,
) -> Result<Vec<PlatformDetailRow>> {
    let filter = InvoiceFilter {
        typ: Some(Direction::Outgoing),
        plattform: platform,
        von: Some(from),
        bis: Some(to),
        ..Default::default()
    };
    let invoices: Vec<Invoice> = db
        .all_invoices(&filter)?
        .into_iter()
        .filter(|invoice| invoice.data.platform.is_some())
        .collect();

    let mut fees_by_invoice: HashMap<i64, Vec<Fee>> = HashMap::new();
    for row in db.list_fee_rows(Some(from), Some(to), platform)? {
        fees_by_invoice.entry(row.fee.invoice_id).or_default().push(row.fee);
    }

    Ok(invoices
        .into_iter()
        .map(|invoice| {
            let fees = fees_by_invoice.remove(&invoice.id).unwrap_or_default();
            let data = &invoice.data;
            let fee_total = round_cents(
                data.platform_fee.unwrap_or(0.0)
                    + data.payment_fee.unwrap_or(0.0)
                    + data.ad_cost.unwrap_or(0.0)
                    + data.shipping_cost.unwrap_or(0.0)
                    + fees.iter().map(|f| f.amount).sum::<f64>(),
            );
            PlatformDetailRow {
                invoice,
                fees,
                fee_total,
            }
        })
        .collect())
}

pub fn platform_detail_csv(rows: &[PlatformDetailRow]) -> Result<Vec<u8>> {
    let headers = [
        "Rechnungsnummer",
        "Datum",
        "Plattform",
        "Kunde",
        "BetragNetto",
        "MwStBetrag",
        "BetragBrutto",
        "Plattformgebuehr",
        "Zahlungsgebuehr",
        "Werbekosten",
        "Versandkosten",
        "WeitereGebuehren",
        "GebuehrenGesamt",
        "Gewinn",
    ];
    let amount = |value: Option<f64>| format_german_decimal(value.unwrap_or(0.0));
    let table: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let data = &row.invoice.data;
            let attached: f64 = row.fees.iter().map(|f| f.amount).sum();
            vec![
                data.number.clone(),
                format_german_date(data.date),
                data.platform.map(|p| p.as_str().to_string()).unwrap_or_default(),
                data.counterparty.clone(),
                format_german_decimal(data.net_amount),
                format_german_decimal(data.vat_amount),
                format_german_decimal(data.gross_amount),
                amount(data.platform_fee),
                amount(data.payment_fee),
                amount(data.ad_cost),
                amount(data.shipping_cost),
                format_german_decimal(attached),
                format_german_decimal(row.fee_total),
                format_german_decimal(data.net_amount - row.fee_total),
            ]
        })
        .collect();
    write_table(&headers, &table)
}

/// Revenue, expenses and profit for `month` and its year, plus the last twelve months.
pub fn dashboard(db: &Database, month: NaiveDate) -> Result<DashboardStats> {
    let current_year_month = month.format("%Y-%m").to_string();
    let current_year = month.format("%Y").to_string();

    let revenue_month = db.get_monthly_sum(Direction::Outgoing, &current_year_month)?;
    let expenses_month = db.get_monthly_sum(Direction::Incoming, &current_year_month)?;
    let revenue_year = db.get_yearly_sum(Direction::Outgoing, &current_year)?;
    let expenses_year = db.get_yearly_sum(Direction::Incoming, &current_year)?;
    let open_expenses = db.get_open_expenses_total()?;

    let recent_revenue = db.get_recent_invoices(Direction::Outgoing, 5)?;
    let recent_expenses = db.get_recent_invoices(Direction::Incoming, 5)?;

    let (chart_months, chart_revenue, chart_expenses, chart_profit) = build_chart_series(db, month)?;

    Ok(DashboardStats {
        month: current_year_month,
        revenue_month,
        revenue_year,
        expenses_month,
        expenses_year,
        profit_month: round_cents(revenue_month - expenses_month),
        profit_year: round_cents(revenue_year - expenses_year),
        open_expenses,
        recent_revenue,
        recent_expenses,
        chart_months,
        chart_revenue,
        chart_expenses,
        chart_profit,
    })
}

fn build_chart_series(
    db: &Database,
    month: NaiveDate,
) -> Result<(Vec<String>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    let base_date = month
        .with_day(1)
        .ok_or_else(|| anyhow!("Ungültiger Monat"))?;

    let mut months = Vec::new();
    let mut revenue = Vec::new();
    let mut expenses = Vec::new();
    let mut profits = Vec::new();

    for offset in (0..12).rev() {
        let date = base_date
            .checked_sub_months(Months::new(offset))
            .ok_or_else(|| anyhow!("Ungültiges Datum"))?;
        let ym = date.format("%Y-%m").to_string();
        let rev = db.get_monthly_sum(Direction::Outgoing, &ym)?;
        let exp = db.get_monthly_sum(Direction::Incoming, &ym)?;
        months.push(ym);
        revenue.push(rev);
        expenses.push(exp);
        profits.push(round_cents(rev - exp));
    }

    Ok((months, revenue, expenses, profits))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub inconsistent: Vec<ConsistencyRow>,
    pub sums: ReconciledSums,
    /// Gross total minus net and VAT totals over all invoices.
    pub total_difference: f64,
}

pub fn consistency_report(db: &Database) -> Result<ConsistencyReport> {
    let inconsistent = db.inconsistent_invoices()?;
    let sums = db.reconciled_sums()?;
    let total_difference = round_cents(sums.sum_brutto - sums.sum_netto - sums.sum_mwst);
    Ok(ConsistencyReport {
        inconsistent,
        sums,
        total_difference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_fixtures::{invoice, platform_invoice};
    use crate::models::{NewAdCost, NewFee};

    fn ymd(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut ebay = platform_invoice("EB-1", "2024-01-10", Platform::Ebay, 100.0);
        ebay.platform_fee = Some(11.0);
        let ebay_id = db.insert_invoice(&ebay).unwrap();
        db.insert_fee(
            ebay_id,
            &NewFee {
                fee_type: FeeType::Advertising,
                amount: 4.0,
                description: Some("Anzeige".to_string()),
            },
        )
        .unwrap();
        db.insert_invoice(&platform_invoice("AM-1", "2024-02-03", Platform::Amazon, 200.0))
            .unwrap();
        db.insert_invoice(&invoice("E-1", "2024-01-15", Direction::Incoming, 500.0))
            .unwrap();
        db.insert_ad_cost(&NewAdCost {
            platform: Platform::Ebay,
            date: ymd("2024-01-20"),
            amount: 5.0,
            campaign: Some("Winter".to_string()),
            description: None,
        })
        .unwrap();
        db
    }

    #[test]
    fn summary_combines_invoice_fees_fee_rows_and_ad_costs() {
        let db = seeded();
        let summary = platform_summary(&db, ymd("2024-01-01"), ymd("2024-12-31"), None).unwrap();

        assert_eq!(summary.months.len(), 2);
        let january = &summary.months[0];
        assert_eq!((january.month.as_str(), january.platform), ("2024-01", Platform::Ebay));
        assert_eq!(january.totals.invoice_count, 1);
        assert_eq!(january.totals.platform_fees, 11.0);
        assert_eq!(january.totals.ad_costs, 9.0);
        assert_eq!(january.totals.total_fees, 20.0);
        assert_eq!(january.totals.profit, 80.0);
        assert_eq!(january.totals.margin, 80.0);

        assert_eq!(summary.platforms.len(), 2);
        assert_eq!(summary.totals.net, 300.0);
        assert_eq!(summary.totals.profit, 280.0);
    }

    #[test]
    fn margin_is_zero_without_revenue() {
        let db = Database::open_in_memory().unwrap();
        db.insert_ad_cost(&NewAdCost {
            platform: Platform::Shopify,
            date: ymd("2024-03-01"),
            amount: 12.0,
            campaign: None,
            description: None,
        })
        .unwrap();
        let summary = platform_summary(&db, ymd("2024-01-01"), ymd("2024-12-31"), None).unwrap();
        assert_eq!(summary.months[0].totals.invoice_count, 0);
        assert_eq!(summary.months[0].totals.profit, -12.0);
        assert_eq!(summary.months[0].totals.margin, 0.0);
    }

    #[test]
    fn detail_attaches_fee_rows_and_exports() {
        let db = seeded();
        let rows = platform_detail(&db, ymd("2024-01-01"), ymd("2024-12-31"), Some(Platform::Ebay)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fees.len(), 1);
        assert_eq!(rows[0].fee_total, 15.0);

        let csv = String::from_utf8(platform_detail_csv(&rows).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Rechnungsnummer;Datum;Plattform"));
        assert!(lines.next().unwrap().starts_with("EB-1;10.01.2024;eBay;"));
    }

    #[test]
    fn dashboard_sums_both_directions() {
        let db = seeded();
        let stats = dashboard(&db, ymd("2024-02-01")).unwrap();
        assert_eq!(stats.month, "2024-02");
        assert_eq!(stats.revenue_month, 238.0);
        assert_eq!(stats.revenue_year, 357.0);
        assert_eq!(stats.expenses_year, 595.0);
        assert_eq!(stats.open_expenses, 595.0);
        assert_eq!(stats.chart_months.len(), 12);
        assert_eq!(stats.chart_months[11], "2024-02");
        assert_eq!(stats.chart_months[0], "2023-03");
        assert_eq!(stats.recent_expenses.len(), 1);
    }

    #[test]
    fn consistency_report_flags_mismatches() {
        let db = Database::open_in_memory().unwrap();
        let mut broken = invoice("X-1", "2024-01-01", Direction::Incoming, 100.0);
        broken.gross_amount = 120.0;
        db.insert_invoice(&broken).unwrap();
        db.insert_invoice(&invoice("X-2", "2024-01-02", Direction::Incoming, 10.0))
            .unwrap();

        let report = consistency_report(&db).unwrap();
        assert_eq!(report.inconsistent.len(), 1);
        assert_eq!(report.inconsistent[0].rechnungsnummer, "X-1");
        assert_eq!(report.sums.checked, 2);
        assert_eq!(report.total_difference, 1.0);
    }
}
