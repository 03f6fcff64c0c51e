use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("Unbekannter Wert für {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        ParseEnumError {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lowercases and folds umlauts so "Überfällig", "ueberfaellig" and "UEBERFAELLIG" compare equal.
pub fn fold_key(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "eingang", alias = "Eingang")]
    Incoming,
    #[serde(rename = "ausgang", alias = "Ausgang")]
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "eingang",
            Direction::Outgoing => "ausgang",
        }
    }
}

impl FromStr for Direction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold_key(s).as_str() {
            "eingang" | "eingangsrechnung" | "incoming" | "in" => Ok(Direction::Incoming),
            "ausgang" | "ausgangsrechnung" | "outgoing" | "out" => Ok(Direction::Outgoing),
            _ => Err(ParseEnumError::new("Typ", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceStatus {
    #[serde(rename = "Offen")]
    Open,
    #[serde(rename = "Bezahlt")]
    Paid,
    #[serde(rename = "Überfällig", alias = "Ueberfaellig")]
    Overdue,
    #[serde(rename = "Storniert")]
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "Offen",
            InvoiceStatus::Paid => "Bezahlt",
            InvoiceStatus::Overdue => "Überfällig",
            InvoiceStatus::Cancelled => "Storniert",
        }
    }
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Open
    }
}

impl FromStr for InvoiceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold_key(s).as_str() {
            "offen" | "open" => Ok(InvoiceStatus::Open),
            "bezahlt" | "paid" => Ok(InvoiceStatus::Paid),
            "ueberfaellig" | "overdue" => Ok(InvoiceStatus::Overdue),
            "storniert" | "cancelled" | "canceled" => Ok(InvoiceStatus::Cancelled),
            _ => Err(ParseEnumError::new("Status", s)),
        }
    }
}

/// Marketplace tag. An untagged invoice carries `None` instead of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "eBay", alias = "ebay")]
    Ebay,
    #[serde(rename = "Amazon", alias = "amazon")]
    Amazon,
    #[serde(rename = "Shopify", alias = "shopify")]
    Shopify,
    #[serde(rename = "Sonstige", alias = "other")]
    Other,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Ebay,
        Platform::Amazon,
        Platform::Shopify,
        Platform::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ebay => "eBay",
            Platform::Amazon => "Amazon",
            Platform::Shopify => "Shopify",
            Platform::Other => "Sonstige",
        }
    }

    /// Parses an optional marketplace tag; "keine", "none" and blanks mean untagged.
    pub fn parse_optional(value: &str) -> Result<Option<Platform>, ParseEnumError> {
        match fold_key(value).as_str() {
            "" | "keine" | "none" | "-" => Ok(None),
            _ => value.parse().map(Some),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold_key(s).as_str() {
            "ebay" => Ok(Platform::Ebay),
            "amazon" => Ok(Platform::Amazon),
            "shopify" => Ok(Platform::Shopify),
            "sonstige" | "other" | "andere" => Ok(Platform::Other),
            _ => Err(ParseEnumError::new("Plattform", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeType {
    #[serde(rename = "Plattform")]
    Platform,
    #[serde(rename = "Zahlung")]
    Payment,
    #[serde(rename = "Werbung")]
    Advertising,
    #[serde(rename = "Versand")]
    Shipping,
    #[serde(rename = "Sonstige")]
    Other,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Platform => "Plattform",
            FeeType::Payment => "Zahlung",
            FeeType::Advertising => "Werbung",
            FeeType::Shipping => "Versand",
            FeeType::Other => "Sonstige",
        }
    }
}

impl FromStr for FeeType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold_key(s).as_str() {
            "plattform" | "plattformgebuehr" | "platform" => Ok(FeeType::Platform),
            "zahlung" | "zahlungsgebuehr" | "payment" => Ok(FeeType::Payment),
            "werbung" | "werbekosten" | "ads" => Ok(FeeType::Advertising),
            "versand" | "versandkosten" | "shipping" => Ok(FeeType::Shipping),
            "sonstige" | "other" => Ok(FeeType::Other),
            _ => Err(ParseEnumError::new("Gebührentyp", s)),
        }
    }
}

macro_rules! impl_sql_text {
    ($($ty:ty),+) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

impl_sql_text!(Direction, InvoiceStatus, Platform, FeeType);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: i64,
    #[serde(flatten)]
    pub data: NewInvoice,
    #[serde(rename = "erstelltAm")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "aktualisiertAm")]
    pub updated_at: DateTime<Utc>,
}

/// Every column of an invoice row except the generated id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    #[serde(rename = "rechnungsnummer")]
    pub number: String,
    #[serde(rename = "datum")]
    pub date: NaiveDate,
    #[serde(rename = "lieferant")]
    pub counterparty: String,
    #[serde(rename = "betragNetto")]
    pub net_amount: f64,
    #[serde(rename = "mwstSatz")]
    pub vat_rate: f64,
    #[serde(rename = "mwstBetrag")]
    pub vat_amount: f64,
    #[serde(rename = "betragBrutto")]
    pub gross_amount: f64,
    #[serde(rename = "leistungszeitraum", default)]
    pub service_period: Option<String>,
    #[serde(rename = "dateiPfad", default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub status: InvoiceStatus,
    #[serde(rename = "typ")]
    pub direction: Direction,
    #[serde(rename = "plattform", default)]
    pub platform: Option<Platform>,
    #[serde(rename = "bestellnummer", default)]
    pub order_number: Option<String>,
    #[serde(rename = "referenz", default)]
    pub reference: Option<String>,
    #[serde(rename = "zahlungsmethode", default)]
    pub payment_method: Option<String>,
    #[serde(rename = "plattformGebuehr", default)]
    pub platform_fee: Option<f64>,
    #[serde(rename = "zahlungsGebuehr", default)]
    pub payment_fee: Option<f64>,
    #[serde(rename = "werbekosten", default)]
    pub ad_cost: Option<f64>,
    #[serde(rename = "versandkosten", default)]
    pub shipping_cost: Option<f64>,
}

impl NewInvoice {
    pub fn has_fee_figures(&self) -> bool {
        self.platform_fee.is_some()
            || self.payment_fee.is_some()
            || self.ad_cost.is_some()
            || self.shipping_cost.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub id: i64,
    #[serde(rename = "rechnungId")]
    pub invoice_id: i64,
    #[serde(rename = "gebuehrTyp")]
    pub fee_type: FeeType,
    #[serde(rename = "betrag")]
    pub amount: f64,
    #[serde(rename = "beschreibung")]
    pub description: Option<String>,
    #[serde(rename = "erstelltAm")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFee {
    #[serde(rename = "gebuehrTyp")]
    pub fee_type: FeeType,
    #[serde(rename = "betrag")]
    pub amount: f64,
    #[serde(rename = "beschreibung", default)]
    pub description: Option<String>,
}

/// Fee row joined with the invoice it belongs to, used by the fee CSV export.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRow {
    pub fee: Fee,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdCost {
    pub id: i64,
    #[serde(flatten)]
    pub data: NewAdCost,
    #[serde(rename = "erstelltAm")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAdCost {
    #[serde(rename = "plattform")]
    pub platform: Platform,
    #[serde(rename = "datum")]
    pub date: NaiveDate,
    #[serde(rename = "betrag")]
    pub amount: f64,
    #[serde(rename = "kampagne", default)]
    pub campaign: Option<String>,
    #[serde(rename = "beschreibung", default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceFilter {
    #[serde(default)]
    pub typ: Option<Direction>,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub plattform: Option<Platform>,
    #[serde(default)]
    pub von: Option<NaiveDate>,
    #[serde(default)]
    pub bis: Option<NaiveDate>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePage {
    pub items: Vec<Invoice>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: i64,
    pub rechnungsnummer: String,
    pub datum: NaiveDate,
    pub lieferant: String,
    pub betrag_brutto: f64,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub month: String,
    pub revenue_month: f64,
    pub revenue_year: f64,
    pub expenses_month: f64,
    pub expenses_year: f64,
    pub profit_month: f64,
    pub profit_year: f64,
    pub open_expenses: f64,
    pub recent_revenue: Vec<InvoiceSummary>,
    pub recent_expenses: Vec<InvoiceSummary>,
    pub chart_months: Vec<String>,
    pub chart_revenue: Vec<f64>,
    pub chart_expenses: Vec<f64>,
    pub chart_profit: Vec<f64>,
}

/// Fields a document-AI service returned for one PDF. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    #[serde(rename = "rechnungsnummer", default)]
    pub number: Option<String>,
    #[serde(rename = "datum", default)]
    pub date: Option<String>,
    #[serde(rename = "lieferant", default)]
    pub counterparty: Option<String>,
    #[serde(rename = "betragNetto", default)]
    pub net_amount: Option<f64>,
    #[serde(rename = "mwstSatz", default)]
    pub vat_rate: Option<f64>,
    #[serde(rename = "mwstBetrag", default)]
    pub vat_amount: Option<f64>,
    #[serde(rename = "betragBrutto", default)]
    pub gross_amount: Option<f64>,
    #[serde(rename = "leistungszeitraum", default)]
    pub service_period: Option<String>,
    #[serde(rename = "bestellnummer", default)]
    pub order_number: Option<String>,
    #[serde(rename = "zahlungsmethode", default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}
