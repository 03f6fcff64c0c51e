use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::services::processor::ImportIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ImportProgress {
    pub status: ImportStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_file: Option<String>,
    pub errors: Vec<ImportIssue>,
    pub invoice_ids: Vec<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    started: Instant,
}

impl ImportProgress {
    fn new(total: usize) -> Self {
        ImportProgress {
            status: ImportStatus::Running,
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            current_file: None,
            errors: Vec::new(),
            invoice_ids: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            started: Instant::now(),
        }
    }

    fn snapshot(&self, id: &str, elapsed: Duration) -> ProgressSnapshot {
        let elapsed_secs = elapsed.as_secs_f64();
        let percent = if self.total == 0 {
            100.0
        } else {
            (self.processed as f64 / self.total as f64 * 1000.0).round() / 10.0
        };
        let estimated_remaining_seconds = match self.status {
            ImportStatus::Running if self.processed > 0 => {
                let remaining = self.total.saturating_sub(self.processed) as f64;
                Some((elapsed_secs / self.processed as f64 * remaining).round())
            }
            ImportStatus::Running => None,
            _ => Some(0.0),
        };
        ProgressSnapshot {
            import_id: id.to_string(),
            status: self.status,
            total: self.total,
            processed: self.processed,
            successful: self.successful,
            failed: self.failed,
            skipped: self.skipped,
            current_file: self.current_file.clone(),
            percent,
            elapsed_seconds: elapsed_secs.round(),
            estimated_remaining_seconds,
            errors: self.errors.clone(),
            invoice_ids: self.invoice_ids.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub import_id: String,
    pub status: ImportStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_file: Option<String>,
    pub percent: f64,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub errors: Vec<ImportIssue>,
    pub invoice_ids: Vec<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Progress of background ZIP imports, keyed by import id.
#[derive(Clone, Default)]
pub struct ImportProgressStore {
    inner: Arc<Mutex<HashMap<String, ImportProgress>>>,
}

impl ImportProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str, total: usize) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(id.to_string(), ImportProgress::new(total));
        }
    }

    /// Applies `f` to the entry; a removed entry is silently ignored.
    pub fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut ImportProgress),
    {
        if let Ok(mut map) = self.inner.lock() {
            if let Some(progress) = map.get_mut(id) {
                f(progress);
            }
        }
    }

    pub fn finish(&self, id: &str, status: ImportStatus) {
        self.update(id, |p| {
            p.status = status;
            p.current_file = None;
            p.finished_at = Some(Utc::now());
        });
    }

    pub fn snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        let map = self.inner.lock().ok()?;
        map.get(id).map(|p| {
            let elapsed = match p.finished_at {
                Some(finished) => (finished - p.started_at).to_std().unwrap_or_default(),
                None => p.started.elapsed(),
            };
            p.snapshot(id, elapsed)
        })
    }

    pub fn remove(&self, id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(id);
        }
    }

    /// Spawns `job` for the import `id`. A job that panics or is cancelled leaves its
    /// entry marked as failed, and the entry still expires after `ttl`.
    pub fn supervise<F>(&self, id: String, ttl: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let store = self.clone();
        let handle = tokio::spawn(job);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(import_id = %id, error = %e, "import task aborted");
                store.finish(&id, ImportStatus::Failed);
                store.schedule_cleanup(id, ttl);
            }
        });
    }

    /// Drops the entry once `ttl` has passed.
    pub fn schedule_cleanup(&self, id: String, ttl: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            store.remove(&id);
            tracing::debug!(import_id = %id, "import progress expired");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_elapsed_time_by_remaining_items() {
        let mut progress = ImportProgress::new(10);
        let before = progress.snapshot("x", Duration::from_secs(0));
        assert_eq!(before.estimated_remaining_seconds, None);

        progress.processed = 4;
        let snapshot = progress.snapshot("x", Duration::from_secs(20));
        assert_eq!(snapshot.percent, 40.0);
        assert_eq!(snapshot.estimated_remaining_seconds, Some(30.0));
    }

    #[test]
    fn store_tracks_counts_and_completion() {
        let store = ImportProgressStore::new();
        store.register("abc", 3);
        store.update("abc", |p| {
            p.processed += 1;
            p.successful += 1;
            p.current_file = Some("a.pdf".to_string());
        });

        let running = store.snapshot("abc").unwrap();
        assert_eq!(running.status, ImportStatus::Running);
        assert_eq!(running.current_file.as_deref(), Some("a.pdf"));

        store.finish("abc", ImportStatus::Completed);
        let done = store.snapshot("abc").unwrap();
        assert_eq!(done.status, ImportStatus::Completed);
        assert_eq!(done.estimated_remaining_seconds, Some(0.0));
        assert!(done.finished_at.is_some());

        assert!(store.snapshot("unbekannt").is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_entry_after_ttl() {
        let store = ImportProgressStore::new();
        store.register("kurz", 1);
        store.schedule_cleanup("kurz".to_string(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.snapshot("kurz").is_none());
    }

    #[tokio::test]
    async fn panicking_job_marks_import_failed() {
        let store = ImportProgressStore::new();
        store.register("kaputt", 2);
        store.supervise("kaputt".to_string(), Duration::from_secs(60), async {
            panic!("extraction crashed");
        });

        let mut status = ImportStatus::Running;
        for _ in 0..100 {
            status = store.snapshot("kaputt").unwrap().status;
            if status != ImportStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ImportStatus::Failed);
        assert!(store.snapshot("kaputt").unwrap().finished_at.is_some());
    }

    #[tokio::test]
    async fn finished_job_is_left_alone() {
        let store = ImportProgressStore::new();
        store.register("gut", 1);
        let inner = store.clone();
        store.supervise("gut".to_string(), Duration::from_secs(60), async move {
            inner.finish("gut", ImportStatus::Completed);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.snapshot("gut").unwrap().status, ImportStatus::Completed);
    }
}
