//! Durable storage for job records.

use crate::JobRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use socials_error::{SchedulingError, SchedulingErrorKind, SchedulingResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Storage for the scheduler's job table.
///
/// `save` replaces the stored table with the given records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Replace the stored jobs.
    async fn save(&self, jobs: &[JobRecord]) -> SchedulingResult<()>;

    /// Load stored jobs. An empty store yields an empty list.
    async fn load(&self) -> SchedulingResult<Vec<JobRecord>>;

    /// Remove every stored job.
    async fn clear(&self) -> SchedulingResult<()>;
}

fn persistence_error(action: &str, path: &Path, e: impl std::fmt::Display) -> SchedulingError {
    SchedulingError::new(SchedulingErrorKind::Persistence(format!(
        "Failed to {} {}: {}",
        action,
        path.display(),
        e
    )))
}

/// Stores jobs as a pretty-printed JSON array.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous table intact.
#[derive(Debug, Clone)]
pub struct JsonFileJobStore {
    path: PathBuf,
}

impl JsonFileJobStore {
    /// Store jobs at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the jobs file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "jobs.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl JobStore for JsonFileJobStore {
    #[instrument(skip(self, jobs), fields(path = %self.path.display(), count = jobs.len()))]
    async fn save(&self, jobs: &[JobRecord]) -> SchedulingResult<()> {
        let json = serde_json::to_string_pretty(jobs)
            .map_err(|e| persistence_error("serialize jobs for", &self.path, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error("create directory for", &self.path, e))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| persistence_error("write", &temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| persistence_error("replace", &self.path, e))?;

        debug!("Saved job table");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> SchedulingResult<Vec<JobRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No job table yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(persistence_error("read", &self.path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let jobs: Vec<JobRecord> = serde_json::from_str(&contents)
            .map_err(|e| persistence_error("parse", &self.path, e))?;
        info!(count = jobs.len(), "Loaded job table");
        Ok(jobs)
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn clear(&self) -> SchedulingResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared job table");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence_error("remove", &self.path, e)),
        }
    }
}

/// Keeps jobs in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<JobRecord>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs currently stored.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.jobs.lock().clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, jobs: &[JobRecord]) -> SchedulingResult<()> {
        *self.jobs.lock() = jobs.to_vec();
        Ok(())
    }

    async fn load(&self) -> SchedulingResult<Vec<JobRecord>> {
        Ok(self.jobs.lock().clone())
    }

    async fn clear(&self) -> SchedulingResult<()> {
        self.jobs.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobDefinition, JobPayload, Trigger};
    use chrono::Utc;

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            JobDefinition::new(JobPayload::Maintenance, Trigger::interval(60)).with_id(id),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileJobStore::new(dir.path().join("data").join("jobs.json"));
        assert!(store.load().await.unwrap().is_empty());

        let jobs = vec![record("a"), record("b")];
        store.save(&jobs).await.unwrap();
        assert_eq!(store.load().await.unwrap(), jobs);
        assert!(!store.temp_path().exists());

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileJobStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err.kind(), SchedulingErrorKind::Persistence(_)));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryJobStore::new();
        store.save(&[record("a")]).await.unwrap();
        assert_eq!(store.snapshot().len(), 1);
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
