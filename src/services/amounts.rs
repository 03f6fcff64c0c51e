use crate::utils::round_cents;

pub const DEFAULT_VAT_RATE: f64 = 19.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amounts {
    pub net: f64,
    pub vat_rate: f64,
    pub vat: f64,
    pub gross: f64,
}

/// Fills in whichever of net, rate, VAT and gross are missing.
///
/// Supplied figures are kept as-is even when they do not add up.
pub fn complete_amounts(
    net: Option<f64>,
    vat_rate: Option<f64>,
    vat: Option<f64>,
    gross: Option<f64>,
) -> Result<Amounts, String> {
    let rate = match vat_rate {
        Some(rate) if !(0.0..=100.0).contains(&rate) => {
            return Err(format!("Ungültiger MwSt-Satz: {}", rate));
        }
        Some(rate) => rate,
        // An implausible inferred rate means the figures do not add up; they stay as given.
        None => match (net, vat, gross) {
            (Some(n), Some(v), _) if n != 0.0 => Some(round_rate(v / n * 100.0)),
            (Some(n), None, Some(g)) if n != 0.0 => Some(round_rate((g - n) / n * 100.0)),
            (None, Some(v), Some(g)) if g - v != 0.0 => Some(round_rate(v / (g - v) * 100.0)),
            _ => None,
        }
        .filter(|rate| (0.0..=100.0).contains(rate))
        .unwrap_or(DEFAULT_VAT_RATE),
    };

    let (net, vat, gross) = match (net, gross) {
        (Some(n), Some(g)) => (n, vat.unwrap_or_else(|| round_cents(g - n)), g),
        (Some(n), None) => {
            let v = vat.unwrap_or_else(|| round_cents(n * rate / 100.0));
            (n, v, round_cents(n + v))
        }
        (None, Some(g)) => {
            let n = match vat {
                Some(v) => round_cents(g - v),
                None => round_cents(g / (1.0 + rate / 100.0)),
            };
            (n, vat.unwrap_or_else(|| round_cents(g - n)), g)
        }
        (None, None) => {
            return Err("Betrag fehlt: weder Netto- noch Bruttobetrag angegeben".to_string())
        }
    };

    Ok(Amounts {
        net,
        vat_rate: rate,
        vat,
        gross,
    })
}

fn round_rate(rate: f64) -> f64 {
    (rate * 10.0).round() / 10.0
}
