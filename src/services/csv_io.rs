use anyhow::{anyhow, Result};
use std::collections::HashMap;

use crate::models::{
    fold_key, Direction, FeeRow, Invoice, InvoiceStatus, NewInvoice, ParseEnumError, Platform,
};
use crate::services::amounts::complete_amounts;
use crate::utils::{format_german_date, format_german_decimal, parse_date, parse_decimal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Number,
    Date,
    Counterparty,
    Net,
    VatRate,
    Vat,
    Gross,
    ServicePeriod,
    Direction,
    Status,
    Platform,
    OrderNumber,
    Reference,
    PaymentMethod,
    PlatformFee,
    PaymentFee,
    AdCost,
    ShippingCost,
    FilePath,
}

/// Column order of the invoice export and template.
pub const EXPORT_COLUMNS: [Column; 19] = [
    Column::Number,
    Column::Date,
    Column::Counterparty,
    Column::Direction,
    Column::Status,
    Column::Platform,
    Column::Net,
    Column::VatRate,
    Column::Vat,
    Column::Gross,
    Column::ServicePeriod,
    Column::OrderNumber,
    Column::Reference,
    Column::PaymentMethod,
    Column::PlatformFee,
    Column::PaymentFee,
    Column::AdCost,
    Column::ShippingCost,
    Column::FilePath,
];

impl Column {
    /// Matches a CSV header or form field name. Case, umlauts, spaces and
    /// punctuation are ignored, so "MwSt.-Satz" and "mwstSatz" are the same column.
    pub fn from_header(header: &str) -> Option<Column> {
        let key: String = fold_key(header)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let column = match key.as_str() {
            "rechnungsnummer" | "rechnungsnr" | "rechnungnr" | "nummer" | "invoicenumber" => Column::Number,
            "datum" | "rechnungsdatum" | "date" | "invoicedate" => Column::Date,
            "lieferant" | "kunde" | "partner" | "name" | "firma" | "counterparty" | "supplier" => {
                Column::Counterparty
            }
            "betragnetto" | "netto" | "nettobetrag" | "net" | "netamount" => Column::Net,
            "mwstsatz" | "ustsatz" | "steuersatz" | "vatrate" => Column::VatRate,
            "mwstbetrag" | "mwst" | "ust" | "steuerbetrag" | "vat" | "vatamount" => Column::Vat,
            "betragbrutto" | "brutto" | "bruttobetrag" | "gesamt" | "gross" | "grossamount" | "total" => {
                Column::Gross
            }
            "leistungszeitraum" | "serviceperiod" => Column::ServicePeriod,
            "typ" | "richtung" | "direction" => Column::Direction,
            "status" => Column::Status,
            "plattform" | "platform" | "marktplatz" => Column::Platform,
            "bestellnummer" | "bestellnr" | "ordernumber" | "orderid" => Column::OrderNumber,
            "referenz" | "reference" | "verwendungszweck" => Column::Reference,
            "zahlungsmethode" | "zahlungsart" | "paymentmethod" => Column::PaymentMethod,
            "plattformgebuehr" | "platformfee" | "verkaufsgebuehr" => Column::PlatformFee,
            "zahlungsgebuehr" | "paymentfee" | "transaktionsgebuehr" => Column::PaymentFee,
            "werbekosten" | "adcost" | "anzeigenkosten" => Column::AdCost,
            "versandkosten" | "shippingcost" | "versand" => Column::ShippingCost,
            "datei" | "dateipfad" | "filepath" => Column::FilePath,
            _ => return None,
        };
        Some(column)
    }

    pub fn export_header(&self) -> &'static str {
        match self {
            Column::Number => "Rechnungsnummer",
            Column::Date => "Datum",
            Column::Counterparty => "Lieferant",
            Column::Net => "BetragNetto",
            Column::VatRate => "MwStSatz",
            Column::Vat => "MwStBetrag",
            Column::Gross => "BetragBrutto",
            Column::ServicePeriod => "Leistungszeitraum",
            Column::Direction => "Typ",
            Column::Status => "Status",
            Column::Platform => "Plattform",
            Column::OrderNumber => "Bestellnummer",
            Column::Reference => "Referenz",
            Column::PaymentMethod => "Zahlungsmethode",
            Column::PlatformFee => "Plattformgebuehr",
            Column::PaymentFee => "Zahlungsgebuehr",
            Column::AdCost => "Werbekosten",
            Column::ShippingCost => "Versandkosten",
            Column::FilePath => "Datei",
        }
    }
}

/// One input record (CSV row or upload form) keyed by recognized column.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub line: usize,
    pub fields: HashMap<Column, String>,
}

impl RawRecord {
    pub fn insert(&mut self, name: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if let Some(column) = Column::from_header(name) {
            self.fields.insert(column, value.to_string());
        }
    }

    pub fn get(&self, column: Column) -> Option<&str> {
        self.fields.get(&column).map(String::as_str)
    }

    fn required(&self, column: Column) -> Result<&str, String> {
        self.get(column)
            .ok_or_else(|| format!("Pflichtfeld '{}' fehlt", column.export_header()))
    }

    fn amount(&self, column: Column) -> Result<Option<f64>, String> {
        self.get(column)
            .map(|raw| {
                parse_decimal(raw).map_err(|_| {
                    format!("Ungültiger Betrag in '{}': '{}'", column.export_header(), raw)
                })
            })
            .transpose()
    }

    /// Validates the record and turns it into an invoice. The platform stays as given;
    /// detection and fee estimation happen in the import pipeline.
    pub fn to_invoice(&self, default_direction: Direction) -> Result<NewInvoice, String> {
        let number = self.required(Column::Number)?.to_string();
        let raw_date = self.required(Column::Date)?;
        let date = parse_date(raw_date).ok_or_else(|| format!("Ungültiges Datum: '{}'", raw_date))?;
        let counterparty = self.required(Column::Counterparty)?.to_string();

        let amounts = complete_amounts(
            self.amount(Column::Net)?,
            self.amount(Column::VatRate)?,
            self.amount(Column::Vat)?,
            self.amount(Column::Gross)?,
        )?;

        let direction = match self.get(Column::Direction) {
            Some(raw) => raw.parse().map_err(|e: ParseEnumError| e.to_string())?,
            None => default_direction,
        };
        let status = match self.get(Column::Status) {
            Some(raw) => raw.parse().map_err(|e: ParseEnumError| e.to_string())?,
            None => InvoiceStatus::Open,
        };
        let platform = match self.get(Column::Platform) {
            Some(raw) => Platform::parse_optional(raw).map_err(|e| e.to_string())?,
            None => None,
        };
        let text = |column| self.get(column).map(str::to_string);

        Ok(NewInvoice {
            number,
            date,
            counterparty,
            net_amount: amounts.net,
            vat_rate: amounts.vat_rate,
            vat_amount: amounts.vat,
            gross_amount: amounts.gross,
            service_period: text(Column::ServicePeriod),
            file_path: text(Column::FilePath),
            status,
            direction,
            platform,
            order_number: text(Column::OrderNumber),
            reference: text(Column::Reference),
            payment_method: text(Column::PaymentMethod),
            platform_fee: self.amount(Column::PlatformFee)?,
            payment_fee: self.amount(Column::PaymentFee)?,
            ad_cost: self.amount(Column::AdCost)?,
            shipping_cost: self.amount(Column::ShippingCost)?,
        })
    }
}

fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let candidates = [b';', b',', b'\t'];
    candidates
        .into_iter()
        .max_by_key(|d| header.bytes().filter(|b| b == d).count())
        .unwrap_or(b';')
}

/// Reads an uploaded CSV into records. Unknown columns are ignored; a header
/// without a single known column is rejected.
pub fn read_records(bytes: &[u8]) -> Result<Vec<RawRecord>> {
    let text = std::str::from_utf8(bytes).map_err(|_| anyhow!("CSV ist nicht UTF-8-kodiert"))?;
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(anyhow!("CSV-Datei ist leer"));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| anyhow!("CSV-Kopfzeile: {}", e))?
        .iter()
        .map(str::to_string)
        .collect();
    if !headers.iter().any(|h| Column::from_header(h).is_some()) {
        return Err(anyhow!("CSV-Kopfzeile enthält keine bekannten Spalten"));
    }

    let mut records = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let row = result.map_err(|e| anyhow!("CSV-Zeile {}: {}", index + 2, e))?;
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let mut record = RawRecord {
            line: row.position().map(|p| p.line() as usize).unwrap_or(index + 2),
            ..Default::default()
        };
        for (header, value) in headers.iter().zip(row.iter()) {
            record.insert(header, value);
        }
        records.push(record);
    }
    Ok(records)
}

fn optional_amount(value: Option<f64>) -> String {
    value.map(format_german_decimal).unwrap_or_default()
}

fn invoice_cell(invoice: &Invoice, column: Column) -> String {
    let data = &invoice.data;
    match column {
        Column::Number => data.number.clone(),
        Column::Date => format_german_date(data.date),
        Column::Counterparty => data.counterparty.clone(),
        Column::Net => format_german_decimal(data.net_amount),
        Column::VatRate => format_german_decimal(data.vat_rate),
        Column::Vat => format_german_decimal(data.vat_amount),
        Column::Gross => format_german_decimal(data.gross_amount),
        Column::ServicePeriod => data.service_period.clone().unwrap_or_default(),
        Column::Direction => data.direction.as_str().to_string(),
        Column::Status => data.status.as_str().to_string(),
        Column::Platform => data.platform.map(|p| p.as_str().to_string()).unwrap_or_default(),
        Column::OrderNumber => data.order_number.clone().unwrap_or_default(),
        Column::Reference => data.reference.clone().unwrap_or_default(),
        Column::PaymentMethod => data.payment_method.clone().unwrap_or_default(),
        Column::PlatformFee => optional_amount(data.platform_fee),
        Column::PaymentFee => optional_amount(data.payment_fee),
        Column::AdCost => optional_amount(data.ad_cost),
        Column::ShippingCost => optional_amount(data.shipping_cost),
        Column::FilePath => data.file_path.clone().unwrap_or_default(),
    }
}

fn writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| anyhow!("CSV konnte nicht geschrieben werden: {}", e))
}

pub fn write_invoices(invoices: &[Invoice]) -> Result<Vec<u8>> {
    let mut out = writer();
    out.write_record(EXPORT_COLUMNS.iter().map(Column::export_header))?;
    for invoice in invoices {
        out.write_record(EXPORT_COLUMNS.iter().map(|c| invoice_cell(invoice, *c)))?;
    }
    finish(out)
}

pub fn write_fee_rows(rows: &[FeeRow]) -> Result<Vec<u8>> {
    let mut out = writer();
    out.write_record([
        "GebuehrId",
        "Rechnungsnummer",
        "Datum",
        "Plattform",
        "Gebuehrtyp",
        "Betrag",
        "Beschreibung",
    ])?;
    for row in rows {
        out.write_record([
            row.fee.id.to_string(),
            row.invoice_number.clone(),
            format_german_date(row.invoice_date),
            row.platform.map(|p| p.as_str().to_string()).unwrap_or_default(),
            row.fee.fee_type.as_str().to_string(),
            format_german_decimal(row.fee.amount),
            row.fee.description.clone().unwrap_or_default(),
        ])?;
    }
    finish(out)
}

/// Header plus one example row, offered as download for manual CSV preparation.
pub fn template() -> Result<Vec<u8>> {
    let mut out = writer();
    out.write_record(EXPORT_COLUMNS.iter().map(Column::export_header))?;
    out.write_record([
        "RE-2024-0001",
        "15.01.2024",
        "Muster GmbH",
        "eingang",
        "Offen",
        "",
        "100,00",
        "19,00",
        "19,00",
        "119,00",
        "01.01.2024 - 31.01.2024",
        "",
        "",
        "Überweisung",
        "",
        "",
        "",
        "",
        "",
    ])?;
    finish(out)
}

/// Generic writer for report tables built elsewhere.
pub fn write_table(headers: &[&str], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut out = writer();
    out.write_record(headers)?;
    for row in rows {
        out.write_record(row)?;
    }
    finish(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn matches_header_aliases() {
        assert_eq!(Column::from_header("Rechnungs-Nr."), Some(Column::Number));
        assert_eq!(Column::from_header("MwSt.-Satz"), Some(Column::VatRate));
        assert_eq!(Column::from_header("betragNetto"), Some(Column::Net));
        assert_eq!(Column::from_header("Plattformgebühr"), Some(Column::PlatformFee));
        assert_eq!(Column::from_header("Bemerkung"), None);
    }

    #[test]
    fn reads_semicolon_csv_with_bom_and_german_numbers() {
        let csv = "\u{feff}Rechnungsnummer;Datum;Lieferant;Netto;MwSt-Satz;Notiz\n\
                   RE-1;15.01.2024;Muster GmbH;1.000,00;19;egal\n\
                   ;;;;;\n\
                   RE-2;2024-01-16;Beispiel AG;20;7;\n";
        let records = read_records(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(Column::Net), Some("1.000,00"));
        assert_eq!(records[1].get(Column::Number), Some("RE-2"));
        assert_eq!(records[1].line, 4);

        let invoice = records[0].to_invoice(Direction::Incoming).unwrap();
        assert_eq!(invoice.net_amount, 1000.0);
        assert_eq!(invoice.vat_amount, 190.0);
        assert_eq!(invoice.gross_amount, 1190.0);
    }

    #[test]
    fn reads_comma_csv_with_quotes() {
        let csv = "rechnungsnummer,datum,lieferant,betragBrutto\n\"A-1\",2024-02-01,\"Firma, KG\",119\n";
        let records = read_records(csv.as_bytes()).unwrap();
        let invoice = records[0].to_invoice(Direction::Outgoing).unwrap();
        assert_eq!(invoice.counterparty, "Firma, KG");
        assert_eq!(invoice.net_amount, 100.0);
        assert_eq!(invoice.direction, Direction::Outgoing);
    }

    #[test]
    fn rejects_unknown_headers_and_empty_files() {
        assert!(read_records(b"foo;bar\n1;2\n").is_err());
        assert!(read_records(b"   ").is_err());
    }

    #[test]
    fn row_validation_names_the_problem() {
        let mut record = RawRecord::default();
        record.insert("rechnungsnummer", "RE-9");
        record.insert("datum", "32.13.2024");
        record.insert("lieferant", "X");
        record.insert("netto", "10");
        assert_eq!(
            record.to_invoice(Direction::Incoming).unwrap_err(),
            "Ungültiges Datum: '32.13.2024'"
        );

        let mut missing = RawRecord::default();
        missing.insert("datum", "01.01.2024");
        assert_eq!(
            missing.to_invoice(Direction::Incoming).unwrap_err(),
            "Pflichtfeld 'Rechnungsnummer' fehlt"
        );
    }

    #[test]
    fn net_with_rate_and_no_gross_becomes_119() {
        let mut record = RawRecord::default();
        record.insert("rechnungsnummer", "RE-100");
        record.insert("datum", "01.03.2024");
        record.insert("lieferant", "Muster GmbH");
        record.insert("betragNetto", "100");
        record.insert("mwstSatz", "19");
        let invoice = record.to_invoice(Direction::Incoming).unwrap();
        assert_eq!(invoice.gross_amount, 119.0);
    }

    #[test]
    fn row_whose_figures_do_not_add_up_is_kept() {
        let mut record = RawRecord::default();
        record.insert("rechnungsnummer", "RE-RABATT");
        record.insert("datum", "01.03.2024");
        record.insert("lieferant", "Muster GmbH");
        record.insert("netto", "100,00");
        record.insert("brutto", "90,00");
        let invoice = record.to_invoice(Direction::Incoming).unwrap();
        assert_eq!(invoice.net_amount, 100.0);
        assert_eq!(invoice.gross_amount, 90.0);
    }

    #[test]
    fn export_is_readable_by_import() {
        let invoice = Invoice {
            id: 7,
            data: NewInvoice {
                number: "EB-7".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
                counterparty: "Käufer; mit Semikolon".to_string(),
                net_amount: 84.03,
                vat_rate: 19.0,
                vat_amount: 15.97,
                gross_amount: 100.0,
                service_period: None,
                file_path: None,
                status: InvoiceStatus::Paid,
                direction: Direction::Outgoing,
                platform: Some(Platform::Ebay),
                order_number: Some("12-34567-89012".to_string()),
                reference: None,
                payment_method: None,
                platform_fee: Some(11.0),
                payment_fee: None,
                ad_cost: None,
                shipping_cost: Some(4.99),
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let bytes = write_invoices(std::slice::from_ref(&invoice)).unwrap();
        let records = read_records(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        let back = records[0].to_invoice(Direction::Incoming).unwrap();
        assert_eq!(back, invoice.data);
    }

    #[test]
    fn template_has_header_and_example() {
        let bytes = template().unwrap();
        let records = read_records(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].to_invoice(Direction::Incoming).is_ok());
    }
}
