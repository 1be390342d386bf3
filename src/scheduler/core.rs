use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::job::{Job, JobId};
use crate::jobtype::{JobTypeRegistry, PeriodicKind};
use crate::queue::CommandQueue;
use crate::scheduler::deferred::{retry_delay, DeferredJob};
use crate::scheduler::heap::{SystemEntry, SystemHeap};
use crate::spawn::{JobHandle, JobSpawner};
use crate::store::JobStore;

/// Ceiling for any bounded wait handed to a queue backend. Far-future
/// wakeups (disabled jobs) would otherwise produce waits outside the timer
/// range; the loop re-derives the wait on every iteration, so the clamp is
/// unobservable.
const MAX_COMMAND_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// A REFRESH may observe stale row data from an in-flight transaction, so
/// its recomputed wakeup is clamped to at most this far in the future.
const REFRESH_WAKEUP_CLAMP_SECS: i64 = 30;

/// "Never": disabled jobs stay in the heap with this wakeup so a later
/// REFRESH can still find them.
fn far_future() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

/// The background job scheduler daemon.
///
/// A single-threaded cooperative loop multiplexes periodic "system" jobs
/// (min-heap keyed by next wakeup) and user-submitted jobs (bounded FIFO
/// pool), spawning one OS process per running job. Producers signal it over
/// the injected [`CommandQueue`]; the injected [`JobStore`] stays the source
/// of truth throughout. All mutable state is owned by the loop; the only
/// suspension point is the blocking queue read.
pub struct JobScheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<JobTypeRegistry>,
    spawner: Arc<dyn JobSpawner>,
    queue: CommandQueue,

    heap: SystemHeap,
    user_pool: VecDeque<Job>,
    running_user_jobs: HashSet<JobId>,
    /// Wakeup timestamps of system jobs currently mid-execution.
    system_started: HashMap<JobId, DateTime<Utc>>,
    processes: HashMap<JobId, Box<dyn JobHandle>>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        registry: Arc<JobTypeRegistry>,
        spawner: Arc<dyn JobSpawner>,
        queue: CommandQueue,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            spawner,
            queue,
            heap: SystemHeap::new(),
            user_pool: VecDeque::new(),
            running_user_jobs: HashSet::new(),
            system_started: HashMap::new(),
            processes: HashMap::new(),
        }
    }

    /// Initialize the transport, load pending jobs from the store and run
    /// the control loop until `shutdown` is cancelled or the queue read
    /// fails fatally (broker loss; process supervision restarts us).
    pub async fn start(mut self, shutdown: CancellationToken) -> Result<()> {
        self.queue.clear().await?;
        self.load_jobs().await?;
        tracing::info!(
            system_jobs = self.heap.len(),
            user_jobs = self.user_pool.len(),
            max_user_jobs = self.config.max_user_jobs,
            "Job scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop().await;
                    return Ok(());
                }
                res = self.step() => res?,
            }
        }
    }

    async fn stop(&mut self) {
        tracing::info!(
            running_jobs = self.processes.len(),
            "Job scheduler stopping"
        );
        self.queue.destroy().await;
    }

    /// Load all system jobs plus waiting user jobs, ascending id, and
    /// partition them into the heap and the pool. Misconfigured jobs are
    /// logged and skipped; they must never take the scheduler down.
    async fn load_jobs(&mut self) -> Result<()> {
        let now = Utc::now();
        for job in self.store.list_pending().await? {
            if job.is_system() {
                match self.registry.get(&job.job_type_id) {
                    Err(e) => {
                        tracing::error!(job_id = job.id, error = %e, "Skipping system job")
                    }
                    Ok(t) if t.periodic() == PeriodicKind::NotPeriodic => {
                        tracing::error!(
                            job_id = job.id,
                            job_type = %job.job_type_id,
                            "Skipping system job with a non-periodic type"
                        );
                    }
                    Ok(_) => {
                        let wakeup = self.next_wakeup(&job, now);
                        self.heap.push(wakeup, SystemEntry::Job(job));
                    }
                }
            } else {
                match self.registry.get(&job.job_type_id) {
                    Err(e) => tracing::error!(job_id = job.id, error = %e, "Skipping user job"),
                    Ok(t) if t.periodic() != PeriodicKind::NotPeriodic => {
                        tracing::error!(
                            job_id = job.id,
                            job_type = %job.job_type_id,
                            "Skipping user job with a periodic type"
                        );
                    }
                    // list_pending is ascending, so front-pushing leaves the
                    // oldest submission at the back, where we pop from.
                    Ok(_) => self.push_user_job(job),
                }
            }
        }
        Ok(())
    }

    /// One iteration of the control loop: drain due system jobs, fill free
    /// user-job slots, then block on the queue until the next wakeup.
    async fn step(&mut self) -> Result<()> {
        let now = Utc::now();

        if let Some(peeked) = self.heap.peek() {
            if peeked.wakeup - now < TimeDelta::seconds(1) {
                if let Some(entry) = self.heap.pop() {
                    match entry.payload {
                        SystemEntry::Deferred(deferred) => self.retry_deferred(deferred).await?,
                        SystemEntry::Job(job) => {
                            self.system_started.insert(job.id, entry.wakeup);
                            self.spawn_job(job).await;
                        }
                    }
                }
                // Drain everything due now before blocking.
                return Ok(());
            }
        }

        let timeout = self.heap.peek().map(|entry| {
            (entry.wakeup - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_COMMAND_WAIT)
        });

        while self.running_user_jobs.len() < self.config.max_user_jobs {
            let Some(job) = self.user_pool.pop_back() else {
                break;
            };
            self.running_user_jobs.insert(job.id);
            self.spawn_job(job).await;
        }

        match self.queue.get_command(timeout).await? {
            None => Ok(()), // timeout: loop back to the now-due system job
            Some(cmd) => self.dispatch(cmd).await,
        }
    }

    async fn dispatch(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Start { job_id } => self.handle_start(job_id).await,
            Command::End { job_id } => self.handle_end(job_id).await,
            Command::Refresh { job_id, fields } => self.handle_refresh(job_id, &fields).await,
            ping @ Command::Ping { .. } => {
                self.queue.pong(&ping).await;
                Ok(())
            }
        }
    }

    async fn handle_start(&mut self, job_id: JobId) -> Result<()> {
        match self.store.get(job_id).await? {
            None => {
                // Transaction visibility race: the producer committed after
                // sending START. Retry shortly.
                tracing::info!(job_id, "Job row not visible yet, deferring");
                self.heap.push(
                    Utc::now() + retry_delay(),
                    SystemEntry::Deferred(DeferredJob::new(job_id)),
                );
            }
            Some(job) if job.is_system() => {
                tracing::warn!(job_id, "START received for a system job; ignored");
            }
            Some(job) => self.push_user_job(job),
        }
        Ok(())
    }

    async fn handle_end(&mut self, job_id: JobId) -> Result<()> {
        let Some(job) = self.store.get(job_id).await? else {
            tracing::warn!(job_id, "END received for an unknown job");
            return Ok(());
        };

        if job.is_system() {
            if self.system_started.remove(&job_id).is_some() {
                if job.enabled {
                    let wakeup = self.next_wakeup(&job, Utc::now());
                    self.heap.push(wakeup, SystemEntry::Job(job));
                }
            } else {
                tracing::warn!(job_id, "Spurious END for a system job never started");
            }
        } else {
            self.running_user_jobs.remove(&job_id);
        }

        match self.processes.remove(&job_id) {
            Some(mut handle) => {
                if let Err(e) = handle.wait().await {
                    tracing::warn!(job_id, error = %e, "Could not reap job process");
                }
            }
            None => {
                tracing::debug!(job_id, "No recorded process (started by a previous run?)")
            }
        }
        Ok(())
    }

    async fn handle_refresh(
        &mut self,
        job_id: JobId,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        if self.system_started.contains_key(&job_id) {
            // Mid-execution: the wakeup is recomputed at END time anyway.
            tracing::debug!(job_id, "REFRESH ignored while the job is running");
            return Ok(());
        }

        // Deferred placeholders are not searched here; a REFRESH for a job
        // in that state is dropped with this warning.
        let Some(mut job) = self.heap.remove_job(job_id) else {
            tracing::warn!(job_id, "REFRESH received for a job not scheduled");
            return Ok(());
        };

        job.apply_refresh(fields);
        if job.enabled {
            let now = Utc::now();
            let wakeup = self
                .next_wakeup(&job, now)
                .min(now + TimeDelta::seconds(REFRESH_WAKEUP_CLAMP_SECS));
            self.heap.push(wakeup, SystemEntry::Job(job));
        } else {
            tracing::info!(job_id, "Job disabled; dropped from the schedule");
        }
        Ok(())
    }

    async fn retry_deferred(&mut self, deferred: DeferredJob) -> Result<()> {
        match self.store.get(deferred.job_id).await? {
            Some(job) => {
                tracing::info!(job_id = job.id, trials = deferred.trials, "Deferred job resolved");
                self.push_user_job(job);
            }
            None => {
                let job_id = deferred.job_id;
                match deferred.retry() {
                    Some(next) => {
                        self.heap
                            .push(Utc::now() + retry_delay(), SystemEntry::Deferred(next));
                    }
                    None => {
                        tracing::warn!(job_id, "Job row never became visible; giving up");
                    }
                }
            }
        }
        Ok(())
    }

    /// Queue a user job, guarding against duplicate enqueue of the same id
    /// (two producers can race on the same row).
    fn push_user_job(&mut self, job: Job) {
        if self.user_pool.iter().any(|queued| queued.id == job.id) {
            tracing::debug!(job_id = job.id, "Job already queued");
            return;
        }
        self.user_pool.push_front(job);
    }

    async fn spawn_job(&mut self, job: Job) {
        let job_id = job.id;
        match self.spawner.spawn(&job).await {
            Ok(handle) => {
                self.processes.insert(job_id, handle);
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Could not spawn job process");
                if job.is_system() {
                    // Keep the schedule alive: retry at the next period
                    // instead of silently dropping the job until a restart.
                    self.system_started.remove(&job_id);
                    let wakeup = self.next_wakeup(&job, Utc::now());
                    self.heap.push(wakeup, SystemEntry::Job(job));
                } else {
                    self.running_user_jobs.remove(&job_id);
                }
            }
        }
    }

    /// Next wakeup for a system job: the anchored series
    /// `reference_run + k * period` for the smallest `k >= 0` whose result is
    /// strictly after `now`. Anchoring to the reference instant (instead of
    /// "now") keeps e.g. "every day at 3 AM" at 3 AM. Disabled or
    /// misconfigured jobs wake "never". Pseudo-periodic types may supply an
    /// earlier dynamic candidate.
    fn next_wakeup(&self, job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
        if !job.enabled {
            return far_future();
        }
        let Some(period) = job.period() else {
            tracing::error!(job_id = job.id, "Enabled system job without a periodicity");
            return far_future();
        };
        if period <= TimeDelta::zero() {
            tracing::error!(job_id = job.id, "Non-positive periodicity");
            return far_future();
        }

        let reference = job.reference_run;
        let mut wakeup = if reference > now {
            reference
        } else {
            let elapsed_ms = (now - reference).num_milliseconds();
            let period_ms = period.num_milliseconds();
            let k = elapsed_ms / period_ms + 1;
            reference + TimeDelta::milliseconds(period_ms.saturating_mul(k))
        };
        // Exact-boundary guard: the wakeup must be strictly after now.
        if wakeup <= now {
            wakeup += period;
        }

        if let Ok(job_type) = self.registry.get(&job.job_type_id) {
            if job_type.periodic() == PeriodicKind::PseudoPeriodic {
                if let Some(dynamic) = job_type.next_wakeup(job, now) {
                    wakeup = wakeup.min(dynamic);
                }
            }
        }
        wakeup
    }
}
