use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::job::{Job, JobId};

/// Waitable handle to a spawned job process.
#[async_trait]
pub trait JobHandle: Send {
    /// Wait for the process to exit.
    async fn wait(&mut self) -> Result<()>;
}

/// OS process-spawn primitive required by the scheduler: one process per
/// running job. Abstracted so tests can observe spawns without forking.
#[async_trait]
pub trait JobSpawner: Send + Sync {
    async fn spawn(&self, job: &Job) -> Result<Box<dyn JobHandle>>;
}

/// Production spawner: re-execs this binary's `run-job` subcommand with the
/// job id as a plain argument. The subprocess re-initializes its own store
/// and queue from the forwarded configuration.
pub struct ProcessSpawner {
    broker_url: String,
    store_path: PathBuf,
}

impl ProcessSpawner {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            broker_url: config.broker_url.clone(),
            store_path: config.store_path.clone(),
        }
    }
}

#[async_trait]
impl JobSpawner for ProcessSpawner {
    async fn spawn(&self, job: &Job) -> Result<Box<dyn JobHandle>> {
        let exe = std::env::current_exe()?;
        let child = Command::new(exe)
            .arg("run-job")
            .arg("--job-id")
            .arg(job.id.to_string())
            .arg("--broker")
            .arg(&self.broker_url)
            .arg("--store")
            .arg(&self.store_path)
            .spawn()?;

        tracing::info!(job_id = job.id, "Job process spawned");
        Ok(Box::new(ProcessHandle {
            job_id: job.id,
            child,
        }))
    }
}

struct ProcessHandle {
    job_id: JobId,
    child: Child,
}

#[async_trait]
impl JobHandle for ProcessHandle {
    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        tracing::debug!(job_id = self.job_id, code = ?status.code(), "Job process exited");
        Ok(())
    }
}
