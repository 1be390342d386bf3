//! End-to-end scheduler scenarios driven through the mock queue backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use jobd::command::Command;
use jobd::config::SchedulerConfig;
use jobd::error::Result;
use jobd::job::{Job, JobId};
use jobd::jobtype::{JobType, JobTypeRegistry, PeriodicKind};
use jobd::queue::{CommandQueue, MockQueue};
use jobd::scheduler::JobScheduler;
use jobd::spawn::{JobHandle, JobSpawner};
use jobd::store::MemoryJobStore;

struct TestJobType {
    id: &'static str,
    kind: PeriodicKind,
}

#[async_trait]
impl JobType for TestJobType {
    fn id(&self) -> &str {
        self.id
    }
    fn periodic(&self) -> PeriodicKind {
        self.kind
    }
    async fn execute(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}

fn test_registry() -> Arc<JobTypeRegistry> {
    let mut registry = JobTypeRegistry::new();
    registry.register(Arc::new(TestJobType {
        id: "batch",
        kind: PeriodicKind::NotPeriodic,
    }));
    registry.register(Arc::new(TestJobType {
        id: "cleaner",
        kind: PeriodicKind::Periodic,
    }));
    Arc::new(registry)
}

/// Records spawned job ids instead of forking processes.
#[derive(Default, Clone)]
struct RecordingSpawner {
    spawned: Arc<Mutex<Vec<JobId>>>,
}

impl RecordingSpawner {
    fn spawned(&self) -> Vec<JobId> {
        self.spawned.lock().unwrap().clone()
    }
}

struct NoopHandle;

#[async_trait]
impl JobHandle for NoopHandle {
    async fn wait(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl JobSpawner for RecordingSpawner {
    async fn spawn(&self, job: &Job) -> Result<Box<dyn JobHandle>> {
        self.spawned.lock().unwrap().push(job.id);
        Ok(Box::new(NoopHandle))
    }
}

struct TestScheduler {
    store: MemoryJobStore,
    queue: MockQueue,
    spawner: RecordingSpawner,
    shutdown: CancellationToken,
}

/// Start a scheduler on a background task and hand back the shared
/// collaborator handles once the scheduler is actually consuming commands.
async fn start_scheduler(max_user_jobs: usize, store: MemoryJobStore) -> TestScheduler {
    let queue = MockQueue::new();
    let spawner = RecordingSpawner::default();
    let shutdown = CancellationToken::new();

    let scheduler = JobScheduler::new(
        SchedulerConfig::new("mock://").with_max_user_jobs(max_user_jobs),
        Arc::new(store.clone()),
        test_registry(),
        Arc::new(spawner.clone()),
        CommandQueue::Mock(queue.clone()),
    );
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = scheduler.start(token).await;
    });

    // Startup wipes the transport (clear()), so commands pushed before the
    // loop runs would be lost. Keep probing with PINGs until one is
    // answered; only then is the loop provably reading.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut probe = 0u32;
    while queue.pongs().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "scheduler never started consuming commands"
        );
        queue.push_command(Command::Ping {
            token: format!("warmup-{probe}"),
        });
        probe += 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    TestScheduler {
        store,
        queue,
        spawner,
        shutdown,
    }
}

/// Wait until `predicate` holds or the budget runs out.
async fn wait_for(mut predicate: impl FnMut() -> bool, budget: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

#[tokio::test]
async fn test_due_system_job_is_spawned() {
    let store = MemoryJobStore::new();
    // Period 10s anchored 29s ago: due in about one second.
    store
        .insert(Job::new_system(1, "cleaner", 10, Utc::now() - TimeDelta::seconds(29)))
        .await;

    let harness = start_scheduler(4, store).await;
    assert!(
        wait_for(|| harness.spawner.spawned() == vec![1], Duration::from_secs(3)).await,
        "system job was not spawned at its wakeup"
    );
    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_start_for_unknown_job_defers_until_visible() {
    let harness = start_scheduler(4, MemoryJobStore::new()).await;

    harness.queue.push_command(Command::Start { job_id: 12 });
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The row becomes queryable before the retry ceiling.
    harness.store.insert(Job::new_user(12, "kirika", "batch")).await;

    assert!(
        wait_for(|| harness.spawner.spawned() == vec![12], Duration::from_secs(4)).await,
        "deferred job was never resolved and spawned"
    );
    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_user_job_concurrency_ceiling() {
    let store = MemoryJobStore::new();
    for id in 1..=3 {
        store.insert(Job::new_user(id, "kirika", "batch")).await;
    }

    let harness = start_scheduler(2, store).await;

    assert!(
        wait_for(|| harness.spawner.spawned().len() == 2, Duration::from_secs(2)).await,
        "two slots should fill immediately"
    );
    // Submission order is preserved.
    assert_eq!(harness.spawner.spawned(), vec![1, 2]);

    // The third job waits until an END frees a slot.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.spawner.spawned().len(), 2);

    harness.queue.push_command(Command::End { job_id: 1 });
    assert!(
        wait_for(|| harness.spawner.spawned() == vec![1, 2, 3], Duration::from_secs(2)).await,
        "freed slot was not handed to the waiting job"
    );
    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_duplicate_start_runs_job_once() {
    let store = MemoryJobStore::new();
    store.insert(Job::new_user(5, "kirika", "batch")).await;
    // Ceiling 0 keeps jobs pooled so the duplicate has something to hit.
    let harness = start_scheduler(0, store).await;

    harness.queue.push_command(Command::Start { job_id: 5 });
    harness.queue.push_command(Command::Start { job_id: 5 });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.spawner.spawned().is_empty());
    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_ping_is_answered() {
    let harness = start_scheduler(1, MemoryJobStore::new()).await;

    harness.queue.push_command(Command::Ping {
        token: "tok-1".to_owned(),
    });
    // Startup warmup tokens may precede ours.
    assert!(
        wait_for(
            || harness.queue.pongs().contains(&"tok-1".to_owned()),
            Duration::from_secs(2)
        )
        .await,
        "PING was not answered"
    );
    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_periodic_job_reschedules_after_end() {
    let store = MemoryJobStore::new();
    // Due immediately, then every 2 seconds.
    store
        .insert(Job::new_system(7, "cleaner", 2, Utc::now() - TimeDelta::seconds(10)))
        .await;

    let harness = start_scheduler(4, store).await;
    assert!(
        wait_for(|| harness.spawner.spawned() == vec![7], Duration::from_secs(3)).await
    );

    harness.queue.push_command(Command::End { job_id: 7 });
    assert!(
        wait_for(|| harness.spawner.spawned() == vec![7, 7], Duration::from_secs(4)).await,
        "system job was not rescheduled after END"
    );
    harness.shutdown.cancel();
}

#[tokio::test]
async fn test_misconfigured_jobs_are_skipped_at_startup() {
    let store = MemoryJobStore::new();
    // System job with a non-periodic type, user job with a periodic type:
    // both invariant violations, both skipped without crashing.
    store
        .insert(Job::new_system(1, "batch", 60, Utc::now() - TimeDelta::hours(1)))
        .await;
    store.insert(Job::new_user(2, "kirika", "cleaner")).await;

    let harness = start_scheduler(4, store).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(harness.spawner.spawned().is_empty());

    // The scheduler is still serving commands.
    harness.queue.push_command(Command::Ping {
        token: "alive".to_owned(),
    });
    assert!(
        wait_for(
            || harness.queue.pongs().contains(&"alive".to_owned()),
            Duration::from_secs(2)
        )
        .await
    );
    harness.shutdown.cancel();
}
