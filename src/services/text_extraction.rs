use anyhow::{anyhow, Result};

pub struct TextExtractor;

impl TextExtractor {
    /// Text layer of a PDF. Scanned documents without one are rejected.
    pub fn extract_from_pdf(bytes: &[u8]) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| anyhow!("PDF konnte nicht gelesen werden: {}", e))?;
        if text.trim().is_empty() {
            return Err(anyhow!("PDF enthält keinen Text"));
        }
        Ok(text)
    }

    pub fn validate_text_quality(text: &str) -> bool {
        text.len() > 50 && text.split_whitespace().count() > 10
    }

    /// Collapses whitespace runs and caps the length sent to the extraction API.
    pub fn prepare_for_prompt(text: &str, max_chars: usize) -> String {
        let mut out = String::with_capacity(text.len().min(max_chars));
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
            if out.len() + line.len() + 1 > max_chars {
                break;
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}
