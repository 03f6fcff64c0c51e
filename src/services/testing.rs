//! In-process stand-ins for the document-AI service and the blob store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::AppConfig;
use crate::db::Database;
use crate::models::ExtractedInvoice;
use crate::services::openai::DocumentExtractor;
use crate::services::state::AppState;
use crate::services::storage::BlobStorage;

/// Answers by file name; unknown files fail like an unreadable PDF.
#[derive(Default)]
pub struct StubExtractor {
    answers: Mutex<HashMap<String, ExtractedInvoice>>,
}

impl StubExtractor {
    pub fn with(self, file_name: &str, data: ExtractedInvoice) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert(file_name.to_string(), data);
        }
        self
    }
}

#[async_trait]
impl DocumentExtractor for StubExtractor {
    async fn extract(&self, file_name: &str, _pdf: &[u8]) -> Result<ExtractedInvoice> {
        let base = file_name.rsplit('/').next().unwrap_or(file_name);
        self.answers
            .lock()
            .map_err(|_| anyhow!("stub lock"))?
            .get(base)
            .cloned()
            .ok_or_else(|| anyhow!("PDF enthält keinen Text"))
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        self.blobs
            .lock()
            .map_err(|_| anyhow!("storage lock"))?
            .insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .map_err(|_| anyhow!("storage lock"))?
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("{} nicht gefunden", path))
    }
}

pub fn extracted(number: &str, date: &str, counterparty: &str, gross: f64) -> ExtractedInvoice {
    ExtractedInvoice {
        number: Some(number.to_string()),
        date: Some(date.to_string()),
        counterparty: Some(counterparty.to_string()),
        gross_amount: Some(gross),
        vat_rate: Some(19.0),
        ..Default::default()
    }
}

pub fn test_state(config: AppConfig) -> AppState {
    state_with(config, StubExtractor::default(), Arc::new(MemoryStorage::default()))
}

pub fn state_with(config: AppConfig, extractor: StubExtractor, storage: Arc<MemoryStorage>) -> AppState {
    let db = Database::open_in_memory().unwrap();
    AppState::new(db, config, Arc::new(extractor), storage)
}
