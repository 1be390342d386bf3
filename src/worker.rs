//! Subprocess side of job execution.
//!
//! The scheduler spawns one `run-job` process per job; this module is what
//! that process runs: load the row, resolve the job type, execute it,
//! persist the final status, and signal END so the scheduler releases the
//! concurrency slot and re-arms periodic wakeups.

use tracing::Instrument;

use crate::error::{JobdError, Result};
use crate::job::{JobId, JobStatus};
use crate::jobtype::JobTypeRegistry;
use crate::queue::CommandQueue;
use crate::store::JobStore;

/// Execute one job to completion. END is sent even when execution fails:
/// the scheduler must always get its slot back, and the failure is already
/// recorded on the job row.
pub async fn run_job(
    store: &dyn JobStore,
    registry: &JobTypeRegistry,
    queue: &CommandQueue,
    job_id: JobId,
) -> Result<()> {
    let result = execute(store, registry, job_id).await;
    if let Err(e) = &result {
        tracing::error!(job_id, error = %e, "Job failed");
    }
    queue.end_job(job_id).await;
    result
}

async fn execute(store: &dyn JobStore, registry: &JobTypeRegistry, job_id: JobId) -> Result<()> {
    let mut job = store
        .get(job_id)
        .await?
        .ok_or(JobdError::JobNotFound(job_id))?;

    // Per-job execution context: everything logged below carries the job id
    // and owner.
    let span = tracing::info_span!(
        "job",
        job_id,
        owner = job.owner.as_deref().unwrap_or("system")
    );

    async {
        let job_type = match registry.get(&job.job_type_id) {
            Ok(t) => t,
            Err(e) => {
                // Deployment misconfiguration: fail this job, never the
                // scheduler.
                job.status = JobStatus::Failed;
                store.save(&job).await?;
                return Err(e);
            }
        };

        job.status = JobStatus::Running;
        store.save(&job).await?;

        let outcome = job_type.execute(&job).await;
        job.status = match &outcome {
            Ok(()) => JobStatus::Completed,
            Err(_) => JobStatus::Failed,
        };
        store.save(&job).await?;
        outcome
    }
    .instrument(span)
    .await
}
