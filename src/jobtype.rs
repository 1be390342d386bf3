use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::error::{JobdError, Result};
use crate::job::Job;

/// Classification of a job type's scheduling behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicKind {
    /// Runs once, on user demand.
    NotPeriodic,
    /// Runs on a fixed period anchored at the job's reference run.
    Periodic,
    /// The effective re-run interval is computed by the job type itself
    /// (e.g. "check again only once new data arrived"); the configured
    /// period is the worst-case ceiling.
    PseudoPeriodic,
}

/// The business logic executed inside a spawned job process.
#[async_trait]
pub trait JobType: Send + Sync {
    fn id(&self) -> &str;

    fn periodic(&self) -> PeriodicKind;

    /// Dynamic wakeup candidate for pseudo-periodic types. The scheduler
    /// uses the earlier of this hint and the anchored periodic computation,
    /// so a missing or stale hint never delays a job past its worst case.
    fn next_wakeup(&self, _job: &Job, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        None
    }

    async fn execute(&self, job: &Job) -> Result<()>;
}

/// Maps job-type id strings to executable job types. The set of types is
/// fixed at process start; an unknown id is a deployment misconfiguration.
#[derive(Default)]
pub struct JobTypeRegistry {
    types: HashMap<String, Arc<dyn JobType>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: Arc<dyn JobType>) {
        self.types.insert(job_type.id().to_owned(), job_type);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn JobType>> {
        self.types
            .get(id)
            .cloned()
            .ok_or_else(|| JobdError::UnknownJobType(id.to_owned()))
    }
}

/// Reference non-periodic job type: runs `sh -c <command>` where the command
/// is taken from the job's `data.command` field.
pub struct ShellJobType;

pub const SHELL_JOB_TYPE_ID: &str = "shell";

#[async_trait]
impl JobType for ShellJobType {
    fn id(&self) -> &str {
        SHELL_JOB_TYPE_ID
    }

    fn periodic(&self) -> PeriodicKind {
        PeriodicKind::NotPeriodic
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        let command = job
            .data
            .as_ref()
            .and_then(|d| d.get("command"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| JobdError::Execution("shell job has no 'command' data".to_owned()))?;

        tracing::info!(job_id = job.id, command, "Executing shell job");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            tracing::debug!(job_id = job.id, output = %stdout.trim_end(), "Shell job output");
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(JobdError::Execution(if stderr.is_empty() {
                format!("exit code: {:?}", output.status.code())
            } else {
                stderr.trim_end().to_owned()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_registered_types() {
        let mut registry = JobTypeRegistry::new();
        registry.register(Arc::new(ShellJobType));
        assert!(registry.get(SHELL_JOB_TYPE_ID).is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(JobdError::UnknownJobType(_))
        ));
    }

    #[tokio::test]
    async fn shell_job_success_and_failure() {
        let mut job = Job::new_user(1, "kirika", SHELL_JOB_TYPE_ID);
        job.data = Some(serde_json::json!({"command": "true"}));
        assert!(ShellJobType.execute(&job).await.is_ok());

        job.data = Some(serde_json::json!({"command": "false"}));
        assert!(ShellJobType.execute(&job).await.is_err());
    }

    #[tokio::test]
    async fn shell_job_without_command_fails() {
        let job = Job::new_user(2, "kirika", SHELL_JOB_TYPE_ID);
        assert!(matches!(
            ShellJobType.execute(&job).await,
            Err(JobdError::Execution(_))
        ));
    }
}
