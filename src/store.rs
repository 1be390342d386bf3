use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{JobdError, Result};
use crate::job::{Job, JobId, JobStatus};

/// Persistence boundary for job rows.
///
/// The scheduler treats the store as the durable source of truth and the
/// command queue as a hint channel: every command handler re-reads the row it
/// acts on. Real deployments implement this over their relational database;
/// this crate ships an in-memory store for tests and a JSON file store for
/// the reference binary.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// All system jobs plus user jobs in `Waiting` status, ordered by
    /// ascending id (preserves submission order for user jobs).
    async fn list_pending(&self) -> Result<Vec<Job>>;

    async fn save(&self, job: &Job) -> Result<()>;
}

fn is_pending(job: &Job) -> bool {
    job.is_system() || job.status == JobStatus::Waiting
}

/// In-memory store backed by a shared map. Clones share state, so a test can
/// keep a handle while the scheduler owns another.
#[derive(Default, Clone)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn remove(&self, id: JobId) {
        self.jobs.write().await.remove(&id);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| is_pending(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }
}

/// Minimal file-backed store so the reference binary's `server` and
/// `run-job` processes see the same rows. Every operation re-reads the file;
/// good enough for a demo deployment, not for contended production use.
#[derive(Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<Job>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| JobdError::Store(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, jobs: &[Job]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(jobs).map_err(|e| JobdError::Store(e.to_string()))?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    /// Insert a new job with the next free id. Used by the `submit` command.
    pub async fn insert_new(&self, mut job: Job) -> Result<Job> {
        let mut jobs = self.load().await?;
        job.id = jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        jobs.push(job.clone());
        self.persist(&jobs).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.load().await?.into_iter().find(|j| j.id == id))
    }

    async fn list_pending(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .load()
            .await?
            .into_iter()
            .filter(is_pending)
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let mut jobs = self.load().await?;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) => *slot = job.clone(),
            None => jobs.push(job.clone()),
        }
        self.persist(&jobs).await
    }
}
