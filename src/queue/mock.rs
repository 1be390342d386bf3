use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::command::Command;
use crate::error::Result;
use crate::job::{Job, JobId};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct MockState {
    started_jobs: Vec<JobId>,
    ended_jobs: Vec<JobId>,
    refreshed_jobs: Vec<(JobId, Map<String, Value>)>,
    pongs: Vec<String>,
    inbound: VecDeque<Command>,
}

/// In-memory queue backend for tests: producer-side calls are recorded
/// instead of hitting any OS resource, and tests inject the commands the
/// scheduler should receive. Clones share state.
#[derive(Default, Clone)]
pub struct MockQueue {
    state: Arc<Mutex<MockState>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.started_jobs.clear();
        state.ended_jobs.clear();
        state.refreshed_jobs.clear();
        state.pongs.clear();
        state.inbound.clear();
    }

    pub fn start_job(&self, job: &Job) -> Result<()> {
        self.state.lock().unwrap().started_jobs.push(job.id);
        Ok(())
    }

    pub fn end_job(&self, job_id: JobId) {
        self.state.lock().unwrap().ended_jobs.push(job_id);
    }

    pub fn refresh_job(&self, job_id: JobId, fields: Map<String, Value>) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .refreshed_jobs
            .push((job_id, fields));
        Ok(())
    }

    /// Poll the injected command list until one is available or the timeout
    /// elapses. `None` means no deadline.
    pub async fn get_command(&self, timeout: Option<Duration>) -> Result<Option<Command>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(cmd) = self.state.lock().unwrap().inbound.pop_front() {
                return Ok(Some(cmd));
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn ping(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    pub fn pong(&self, ping: &Command) {
        if let Command::Ping { token } = ping {
            self.state.lock().unwrap().pongs.push(token.clone());
        }
    }

    // Test inspection helpers.

    pub fn push_command(&self, cmd: Command) {
        self.state.lock().unwrap().inbound.push_back(cmd);
    }

    pub fn started_jobs(&self) -> Vec<JobId> {
        self.state.lock().unwrap().started_jobs.clone()
    }

    pub fn ended_jobs(&self) -> Vec<JobId> {
        self.state.lock().unwrap().ended_jobs.clone()
    }

    pub fn refreshed_jobs(&self) -> Vec<(JobId, Map<String, Value>)> {
        self.state.lock().unwrap().refreshed_jobs.clone()
    }

    pub fn pongs(&self) -> Vec<String> {
        self.state.lock().unwrap().pongs.clone()
    }
}
