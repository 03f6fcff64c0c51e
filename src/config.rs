//! Service configuration.
//!
//! Values come from environment variables, optionally seeded from a `.env` file in the
//! working directory, with fallbacks for local development.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Http,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket address the HTTP server binds to
    pub bind_addr: String,

    /// SQLite database file
    pub database_path: PathBuf,

    pub storage_backend: StorageBackend,

    /// Root directory for the local blob storage
    pub storage_dir: PathBuf,

    /// Base URL of the remote blob service (http backend only)
    pub blob_base_url: Option<String>,

    pub blob_token: Option<String>,

    /// Document-AI credentials; imports that need extraction fail without a key
    pub ai_api_key: Option<String>,

    pub ai_api_url: String,

    pub ai_model: String,

    /// Secret for session tokens and signed download URLs
    pub session_secret: String,

    /// Marks the session cookie `Secure`; enable behind HTTPS
    pub secure_cookies: bool,

    pub session_lifetime_secs: i64,

    pub signed_url_lifetime_secs: i64,

    /// PDFs per batch in the background ZIP import
    pub import_batch_size: usize,

    /// Pause between two batches, keeps the AI API from being flooded
    pub import_batch_delay: Duration,

    /// How long finished import progress stays pollable
    pub import_progress_ttl: Duration,

    pub max_upload_bytes: usize,

    /// Created on startup when the user table is empty
    pub admin_username: Option<String>,

    pub admin_password: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case in production.
        let _ = dotenvy::dotenv();

        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "http" => StorageBackend::Http,
            _ => return Err(ConfigError::InvalidValue("STORAGE_BACKEND".to_string())),
        };

        let config = AppConfig {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "rechnungen.sqlite".to_string()),
            ),
            storage_backend,
            storage_dir: PathBuf::from(env::var("STORAGE_DIR").unwrap_or_else(|_| "uploads".to_string())),
            blob_base_url: non_empty_var("BLOB_BASE_URL"),
            blob_token: non_empty_var("BLOB_TOKEN"),
            ai_api_key: non_empty_var("AI_API_KEY"),
            ai_api_url: env::var("AI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            ai_model: env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            session_secret: session_secret(non_empty_var("SESSION_SECRET"), !cfg!(debug_assertions))?,
            secure_cookies: parse_var("SESSION_COOKIE_SECURE", false)?,
            session_lifetime_secs: parse_var("SESSION_LIFETIME_SECS", 12 * 60 * 60)?,
            signed_url_lifetime_secs: parse_var("SIGNED_URL_LIFETIME_SECS", 15 * 60)?,
            import_batch_size: parse_var("IMPORT_BATCH_SIZE", 50)?,
            import_batch_delay: Duration::from_millis(parse_var("IMPORT_BATCH_DELAY_MS", 2000)?),
            import_progress_ttl: Duration::from_secs(parse_var("IMPORT_PROGRESS_TTL_SECS", 3600)?),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 200 * 1024 * 1024)?,
            admin_username: non_empty_var("ADMIN_USERNAME"),
            admin_password: non_empty_var("ADMIN_PASSWORD"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_backend == StorageBackend::Http && self.blob_base_url.is_none() {
            return Err(ConfigError::MissingRequired("BLOB_BASE_URL".to_string()));
        }
        if self.import_batch_size == 0 {
            return Err(ConfigError::InvalidValue("IMPORT_BATCH_SIZE".to_string()));
        }
        Ok(())
    }

    /// Defaults used by tests: no batch delay, in-process everything.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            database_path: PathBuf::from(":memory:"),
            storage_backend: StorageBackend::Local,
            storage_dir: env::temp_dir().join("rechnungsverwaltung-tests"),
            blob_base_url: None,
            blob_token: None,
            ai_api_key: None,
            ai_api_url: "http://127.0.0.1:9/unused".to_string(),
            ai_model: "test".to_string(),
            session_secret: "test-secret".to_string(),
            secure_cookies: false,
            session_lifetime_secs: 3600,
            signed_url_lifetime_secs: 60,
            import_batch_size: 2,
            import_batch_delay: Duration::ZERO,
            import_progress_ttl: Duration::from_secs(3600),
            max_upload_bytes: 10 * 1024 * 1024,
            admin_username: None,
            admin_password: None,
        }
    }
}

/// Release builds refuse to sign sessions with the built-in development secret.
fn session_secret(value: Option<String>, required: bool) -> Result<String, ConfigError> {
    match value {
        Some(secret) => Ok(secret),
        None if required => Err(ConfigError::MissingRequired("SESSION_SECRET".to_string())),
        None => {
            tracing::warn!("SESSION_SECRET not set, using development secret");
            Ok("rechnungsverwaltung-dev-secret".to_string())
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        _ => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_storage_requires_base_url() {
        let mut config = AppConfig::for_tests();
        config.storage_backend = StorageBackend::Http;
        assert!(matches!(config.validate(), Err(ConfigError::MissingRequired(_))));
        config.blob_base_url = Some("https://blob.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn session_secret_is_mandatory_in_release_builds() {
        assert!(matches!(session_secret(None, true), Err(ConfigError::MissingRequired(_))));
        assert_eq!(session_secret(None, false).unwrap(), "rechnungsverwaltung-dev-secret");
        assert_eq!(session_secret(Some("geheim".to_string()), true).unwrap(), "geheim");
    }

    #[test]
    fn unset_numeric_vars_fall_back_to_defaults() {
        let value: usize = parse_var("RECHNUNGEN_TEST_UNSET_VAR", 50).unwrap();
        assert_eq!(value, 50);
    }
}
