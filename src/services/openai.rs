use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::ExtractedInvoice;
use crate::services::text_extraction::TextExtractor;

const MAX_PROMPT_CHARS: usize = 12_000;

/// Turns one PDF document into invoice fields.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, file_name: &str, pdf: &[u8]) -> Result<ExtractedInvoice>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<Message<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Chat-completions client that reads the PDF text layer and asks the model for the fields.
pub struct OpenAiExtractor {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
    model: String,
}

impl OpenAiExtractor {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("HTTP-Client für KI-Dienst")?;
        Ok(OpenAiExtractor {
            client,
            api_key: config.ai_api_key.clone(),
            url: config.ai_api_url.clone(),
            model: config.ai_model.clone(),
        })
    }

    async fn call(&self, api_key: &str, user_prompt: &str) -> Result<String> {
        let prompt = system_prompt();
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.1,
            messages: vec![
                Message {
                    role: "system",
                    content: prompt,
                },
                Message {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("KI-Dienst nicht erreichbar")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("KI-Dienst Fehler {}: {}", status, body));
        }

        let body: ChatResponse = response.json().await.context("Antwort des KI-Dienstes")?;
        let content = body
            .choices
            .first()
            .ok_or_else(|| anyhow!("Leere Antwort des KI-Dienstes"))?
            .message
            .content
            .trim()
            .to_string();
        Ok(content)
    }
}

#[async_trait]
impl DocumentExtractor for OpenAiExtractor {
    async fn extract(&self, file_name: &str, pdf: &[u8]) -> Result<ExtractedInvoice> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("KI-Dienst nicht konfiguriert (AI_API_KEY fehlt)"))?;

        let bytes = pdf.to_vec();
        let text = tokio::task::spawn_blocking(move || TextExtractor::extract_from_pdf(&bytes))
            .await
            .context("Textextraktion abgebrochen")??;
        if !TextExtractor::validate_text_quality(&text) {
            tracing::warn!(file = file_name, "little text in PDF, extraction may be incomplete");
        }

        let user = format!(
            "Datei: {}\nRechnungstext:\n{}",
            file_name,
            TextExtractor::prepare_for_prompt(&text, MAX_PROMPT_CHARS)
        );

        let raw = self.call(api_key, &user).await?;
        let mut value = parse_json(&raw)?;

        let errors = validation_errors(&value)?;
        if !errors.is_empty() {
            tracing::debug!(file = file_name, ?errors, "extraction JSON invalid, asking for a fix");
            let fix_prompt = format!(
                "Korrigiere dieses JSON, sodass es exakt dem Schema entspricht. Fehler: {}. Nur JSON ausgeben. JSON:\n{}",
                errors.join("; "),
                raw
            );
            let fixed = self.call(api_key, &fix_prompt).await?;
            value = parse_json(&fixed)?;
            if !validation_errors(&value)?.is_empty() {
                return Err(anyhow!("Antwort des KI-Dienstes entspricht nicht dem Schema"));
            }
        }

        let mut data: ExtractedInvoice = serde_json::from_value(value)?;
        if data.confidence.is_none() {
            data.confidence = Some(compute_confidence(&data));
        }
        Ok(data)
    }
}

/// Accepts bare JSON and JSON wrapped in a markdown code fence.
fn parse_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str::<Value>(unfenced.trim()).map_err(|e| anyhow!("Ungültiges JSON: {}", e))
}

fn extraction_schema() -> Result<JSONSchema> {
    let schema = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["rechnungsnummer", "datum", "lieferant", "betragBrutto"],
        "properties": {
            "rechnungsnummer": {"type": ["string", "null"]},
            "datum": {"type": ["string", "null"]},
            "lieferant": {"type": ["string", "null"]},
            "betragNetto": {"type": ["number", "null"]},
            "mwstSatz": {"type": ["number", "null"], "minimum": 0, "maximum": 100},
            "mwstBetrag": {"type": ["number", "null"]},
            "betragBrutto": {"type": ["number", "null"]},
            "leistungszeitraum": {"type": ["string", "null"]},
            "bestellnummer": {"type": ["string", "null"]},
            "zahlungsmethode": {"type": ["string", "null"]},
            "confidence": {"type": ["number", "null"], "minimum": 0, "maximum": 1}
        }
    });

    JSONSchema::compile(&schema).map_err(|e| anyhow!("Extraktionsschema: {}", e))
}

fn validation_errors(value: &Value) -> Result<Vec<String>> {
    let schema = extraction_schema()?;
    let errors = match schema.validate(value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    };
    Ok(errors)
}

fn compute_confidence(data: &ExtractedInvoice) -> f64 {
    let mut score: f64 = 0.4;
    if data.number.is_some() {
        score += 0.15;
    }
    if data.date.is_some() {
        score += 0.15;
    }
    if data.counterparty.is_some() {
        score += 0.1;
    }
    if data.gross_amount.is_some() {
        score += 0.1;
    }
    if data.vat_amount.is_some() || data.net_amount.is_some() {
        score += 0.05;
    }
    score.clamp(0.0, 1.0)
}

fn system_prompt() -> &'static str {
    r#"Du bist ein System zur Rechnungserfassung. Antworte ausschließlich mit JSON, das exakt diesem Schema entspricht.
Felder:
- rechnungsnummer (string|null)
- datum (Rechnungsdatum als YYYY-MM-DD|null)
- lieferant (Name des Rechnungsstellers bzw. Kunden, string|null)
- betragNetto (Zahl|null)
- mwstSatz (Prozent als Zahl, z.B. 19|null)
- mwstBetrag (Zahl|null)
- betragBrutto (Gesamtbetrag als Zahl|null)
- leistungszeitraum (string|null)
- bestellnummer (string|null)
- zahlungsmethode (z.B. PayPal, Überweisung, Amazon Pay|null)
- confidence (0 bis 1|null)
Beträge immer als Zahl mit Punkt als Dezimaltrenner, ohne Währungszeichen.
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_and_bare_json() {
        assert_eq!(parse_json(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(parse_json("```json\n{\"a\":1}\n```").unwrap(), json!({"a": 1}));
        assert!(parse_json("kein json").is_err());
    }

    #[test]
    fn schema_accepts_nullable_fields_and_rejects_extras() {
        let valid = json!({
            "rechnungsnummer": "RE-1",
            "datum": "2024-01-15",
            "lieferant": "Muster GmbH",
            "betragNetto": 100.0,
            "mwstSatz": 19,
            "betragBrutto": 119.0,
            "bestellnummer": null
        });
        assert!(validation_errors(&valid).unwrap().is_empty());

        let extra = json!({
            "rechnungsnummer": "RE-1",
            "datum": null,
            "lieferant": null,
            "betragBrutto": "119",
            "waehrung": "EUR"
        });
        assert!(!validation_errors(&extra).unwrap().is_empty());
    }

    #[test]
    fn confidence_grows_with_found_fields() {
        let empty = ExtractedInvoice::default();
        let full = ExtractedInvoice {
            number: Some("RE-1".into()),
            date: Some("2024-01-15".into()),
            counterparty: Some("Muster GmbH".into()),
            gross_amount: Some(119.0),
            net_amount: Some(100.0),
            ..Default::default()
        };
        assert!(compute_confidence(&full) > compute_confidence(&empty));
        assert!(compute_confidence(&full) <= 1.0);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let extractor = OpenAiExtractor::new(&AppConfig::for_tests()).unwrap();
        let err = extractor.extract("a.pdf", b"%PDF-1.4").await.unwrap_err();
        assert!(err.to_string().contains("AI_API_KEY"));
    }
}
