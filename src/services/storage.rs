use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Component, Path, PathBuf};

use crate::config::{AppConfig, StorageBackend};
use crate::models::Direction;
use crate::utils::{sanitize_file_name, sha256_bytes};

/// Where uploaded source documents end up.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores the bytes under `key` and returns the path to keep on the invoice.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;
}

/// `rechnungen/<typ>/<yyyy-mm>/<hash prefix>-<file name>`. The hash prefix keeps two
/// different documents with the same file name apart.
pub fn object_key(direction: Direction, date: NaiveDate, file_name: &str, bytes: &[u8]) -> String {
    let hash = sha256_bytes(bytes);
    format!(
        "rechnungen/{}/{}/{}-{}",
        direction.as_str(),
        date.format("%Y-%m"),
        &hash[..12],
        sanitize_file_name(file_name)
    )
}

pub fn build_storage(config: &AppConfig) -> Result<Box<dyn BlobStorage>> {
    match config.storage_backend {
        StorageBackend::Local => Ok(Box::new(LocalBlobStorage::new(config.storage_dir.clone()))),
        StorageBackend::Http => {
            let base_url = config
                .blob_base_url
                .clone()
                .ok_or_else(|| anyhow!("BLOB_BASE_URL fehlt"))?;
            Ok(Box::new(HttpBlobStorage::new(base_url, config.blob_token.clone())?))
        }
    }
}

pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(root: PathBuf) -> Self {
        LocalBlobStorage { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_key(key)?))
    }
}

/// Keys are relative paths of plain segments; URL escapes and separators other than `/`
/// are refused so a key cannot leave its prefix once a server decodes it.
fn checked_key(key: &str) -> Result<&Path> {
    let relative = Path::new(key);
    let safe = !key.is_empty()
        && !key.contains(['\\', '%', '?', '#'])
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(anyhow!("Ungültiger Speicherpfad: {}", key));
    }
    Ok(relative)
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Verzeichnis {} anlegen", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("{} schreiben", target.display()))?;
        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("{} lesen", path))
    }
}

/// Remote blob service addressed as `<base>/<key>` with PUT and GET.
pub struct HttpBlobStorage {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBlobStorage {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("HTTP-Client für Blob-Speicher")?;
        Ok(HttpBlobStorage {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, key: &str) -> Result<String> {
        Ok(format!("{}/{}", self.base_url, checked_key(key)?.display()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl BlobStorage for HttpBlobStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let response = self
            .authorize(self.client.put(self.url(key)?))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .context("Blob-Speicher nicht erreichbar")?;
        if !response.status().is_success() {
            return Err(anyhow!("Blob-Speicher PUT {}: {}", key, response.status()));
        }
        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let response = self
            .authorize(self.client.get(self.url(path)?))
            .send()
            .await
            .context("Blob-Speicher nicht erreichbar")?;
        if !response.status().is_success() {
            return Err(anyhow!("Blob-Speicher GET {}: {}", path, response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
