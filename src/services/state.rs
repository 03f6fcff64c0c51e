use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::crypto::{hash_password, SessionManager, UrlSigner};
use crate::services::openai::{DocumentExtractor, OpenAiExtractor};
use crate::services::progress::ImportProgressStore;
use crate::services::storage::{build_storage, BlobStorage};

/// Shared handles passed to every request handler and background import.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub config: Arc<AppConfig>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub storage: Arc<dyn BlobStorage>,
    pub progress: ImportProgressStore,
    pub sessions: Arc<SessionManager>,
    pub signer: Arc<UrlSigner>,
}

impl AppState {
    pub fn new(
        db: Database,
        config: AppConfig,
        extractor: Arc<dyn DocumentExtractor>,
        storage: Arc<dyn BlobStorage>,
    ) -> Self {
        let sessions = SessionManager::new(&config.session_secret, config.session_lifetime_secs);
        let signer = UrlSigner::new(&config.session_secret, config.signed_url_lifetime_secs);
        AppState {
            db: Arc::new(Mutex::new(db)),
            config: Arc::new(config),
            extractor,
            storage,
            progress: ImportProgressStore::new(),
            sessions: Arc::new(sessions),
            signer: Arc::new(signer),
        }
    }

    /// Opens the database and wires the configured extractor and storage backend.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let db = Database::new(&config.database_path)
            .with_context(|| format!("Datenbank {} öffnen", config.database_path.display()))?;
        let extractor: Arc<dyn DocumentExtractor> = Arc::new(OpenAiExtractor::new(&config)?);
        let storage: Arc<dyn BlobStorage> = Arc::from(build_storage(&config)?);
        if config.ai_api_key.is_none() {
            tracing::warn!("AI_API_KEY not set, PDF imports will fail");
        }
        Ok(Self::new(db, config, extractor, storage))
    }

    /// Locks the database. Never keep the guard across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))
    }

    /// Creates the configured admin account when no user exists yet.
    pub fn bootstrap_admin(&self) -> Result<()> {
        let (Some(username), Some(password)) = (
            self.config.admin_username.as_deref(),
            self.config.admin_password.as_deref(),
        ) else {
            return Ok(());
        };
        let db = self.db()?;
        if db.count_users()? > 0 {
            return Ok(());
        }
        db.create_user(username, &hash_password(password)?)?;
        tracing::info!(username, "created initial admin user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::crypto::verify_password;
    use crate::services::testing::test_state;

    #[test]
    fn bootstrap_creates_admin_once() {
        let mut config = AppConfig::for_tests();
        config.admin_username = Some("admin".to_string());
        config.admin_password = Some("geheim".to_string());
        let state = test_state(config);

        state.bootstrap_admin().unwrap();
        state.bootstrap_admin().unwrap();

        let db = state.db().unwrap();
        assert_eq!(db.count_users().unwrap(), 1);
        let user = db.find_user("admin").unwrap().unwrap();
        assert!(verify_password("geheim", &user.password_hash));
    }

    #[test]
    fn bootstrap_without_credentials_does_nothing() {
        let state = test_state(AppConfig::for_tests());
        state.bootstrap_admin().unwrap();
        assert_eq!(state.db().unwrap().count_users().unwrap(), 0);
    }
}
