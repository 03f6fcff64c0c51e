use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::Platform;
use crate::utils::round_cents;

static AMAZON_ORDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{7}-\d{7}\b").expect("amazon order regex"));
static EBAY_ORDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{2}-\d{5}-\d{5}\b").expect("ebay order regex"));

const KEYWORDS: &[(&str, Platform)] = &[
    ("ebay", Platform::Ebay),
    ("amazon", Platform::Amazon),
    ("amzn", Platform::Amazon),
    ("shopify", Platform::Shopify),
    ("etsy", Platform::Other),
    ("kaufland", Platform::Other),
    ("otto", Platform::Other),
    ("real.de", Platform::Other),
    ("hood", Platform::Other),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub platform_fee_percent: f64,
    pub payment_fee_percent: f64,
    pub platform_fee: f64,
    pub payment_fee: f64,
}

/// Tags an invoice with a marketplace. Sources are checked strongest first:
/// payment method, order number, reference, then the counterparty name.
pub fn detect_platform(
    payment_method: Option<&str>,
    order_number: Option<&str>,
    reference: Option<&str>,
    counterparty: Option<&str>,
) -> Option<Platform> {
    if let Some(platform) = payment_method.and_then(keyword_match) {
        return Some(platform);
    }
    if let Some(order) = order_number {
        if let Some(platform) = keyword_match(order) {
            return Some(platform);
        }
        if AMAZON_ORDER.is_match(order) {
            return Some(Platform::Amazon);
        }
        if EBAY_ORDER.is_match(order) {
            return Some(Platform::Ebay);
        }
    }
    reference
        .and_then(keyword_match)
        .or_else(|| counterparty.and_then(keyword_match))
}

fn keyword_match(value: &str) -> Option<Platform> {
    let lowered = value.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| contains_word(&lowered, keyword))
        .map(|(_, platform)| *platform)
}

/// Substring match that refuses hits inside a longer word, so "Ottobock" is not Otto.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}

/// Percentages of gross: (platform fee, payment fee).
pub fn fee_rates(platform: Platform) -> (f64, f64) {
    match platform {
        Platform::Ebay => (11.0, 0.0),
        Platform::Amazon => (15.0, 0.0),
        Platform::Shopify => (2.0, 2.1),
        Platform::Other => (5.0, 1.9),
    }
}

pub fn estimate_fees(platform: Platform, gross: f64) -> FeeEstimate {
    let (platform_pct, payment_pct) = fee_rates(platform);
    FeeEstimate {
        platform_fee_percent: platform_pct,
        payment_fee_percent: payment_pct,
        platform_fee: round_cents(gross * platform_pct / 100.0),
        payment_fee: round_cents(gross * payment_pct / 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_wins_over_other_sources() {
        let platform = detect_platform(
            Some("Amazon Pay"),
            Some("12-34567-89012"),
            Some("ebay Verkauf"),
            Some("Shopify Inc."),
        );
        assert_eq!(platform, Some(Platform::Amazon));
    }

    #[test]
    fn order_number_patterns_are_recognized() {
        assert_eq!(
            detect_platform(None, Some("302-1234567-7654321"), None, None),
            Some(Platform::Amazon)
        );
        assert_eq!(
            detect_platform(Some("Überweisung"), Some("12-34567-89012"), None, None),
            Some(Platform::Ebay)
        );
    }

    #[test]
    fn falls_back_to_reference_then_counterparty() {
        assert_eq!(
            detect_platform(None, Some("4711"), Some("Shopify Payout"), Some("eBay GmbH")),
            Some(Platform::Shopify)
        );
        assert_eq!(
            detect_platform(None, None, None, Some("Etsy Ireland UC")),
            Some(Platform::Other)
        );
        assert_eq!(detect_platform(None, None, None, Some("Ottobock SE")), None);
        assert_eq!(detect_platform(None, None, None, None), None);
    }

    #[test]
    fn estimates_fixed_percentages() {
        let ebay = estimate_fees(Platform::Ebay, 200.0);
        assert_eq!(ebay.platform_fee, 22.0);
        assert_eq!(ebay.payment_fee, 0.0);

        let shopify = estimate_fees(Platform::Shopify, 100.0);
        assert_eq!(shopify.platform_fee, 2.0);
        assert_eq!(shopify.payment_fee, 2.1);
    }
}
