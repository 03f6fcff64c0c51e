use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// German export format: decimal comma, no thousands separator.
pub fn format_german_decimal(value: f64) -> String {
    format!("{:.2}", value).replace('.', ",")
}

pub fn format_german_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// Parses amounts as they appear in German and international sources:
/// "1.234,56", "1234,56", "1,234.56", "1234.56", "119 €", "19%".
pub fn parse_decimal(value: &str) -> Result<f64> {
    let cleaned: String = value
        .trim()
        .trim_end_matches("EUR")
        .chars()
        .filter(|c| !matches!(c, '€' | '%' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return Err(anyhow!("Leerer Betrag"));
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    normalized
        .parse::<f64>()
        .map_err(|_| anyhow!("Ungültiger Betrag: '{}'", value.trim()))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    // AI responses and spreadsheet exports sometimes append a time part.
    let raw = raw.split(['T', ' ']).next().unwrap_or(raw);

    // Two-digit years first: "%Y" would happily read "24" as the year 24.
    let formats = ["%Y-%m-%d", "%d.%m.%y", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d"];
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Keeps a file name safe for use inside a storage key.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "dokument".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn has_extension(name: &str, ext: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_german_and_plain_amounts() {
        assert_eq!(parse_decimal("1.234,56").unwrap(), 1234.56);
        assert_eq!(parse_decimal("1234,56").unwrap(), 1234.56);
        assert_eq!(parse_decimal("1,234.56").unwrap(), 1234.56);
        assert_eq!(parse_decimal("119.00 €").unwrap(), 119.0);
        assert_eq!(parse_decimal("19%").unwrap(), 19.0);
        assert_eq!(parse_decimal("1.000.000").unwrap(), 1_000_000.0);
        assert_eq!(parse_decimal("-5,5").unwrap(), -5.5);
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("  ").is_err());
    }

    #[test]
    fn parses_common_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(parse_date("2024-02-29"), Some(expected));
        assert_eq!(parse_date("29.02.2024"), Some(expected));
        assert_eq!(parse_date("29.02.24"), Some(expected));
        assert_eq!(parse_date("2024-02-29T00:00:00Z"), Some(expected));
        assert_eq!(parse_date("31.02.2024"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn formats_for_german_export() {
        assert_eq!(format_german_decimal(1234.5), "1234,50");
        assert_eq!(format_german_date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()), "05.01.2024");
        assert_eq!(round_cents(18.999), 19.0);
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("Rechnung März 2024.pdf"), "Rechnung_M_rz_2024.pdf");
        assert_eq!(sanitize_file_name(".."), "dokument");
        assert!(has_extension("a/B.PDF", "pdf"));
        assert!(!has_extension("a.csv", "pdf"));
    }
}
