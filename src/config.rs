use std::path::PathBuf;

/// Configuration for the job scheduler daemon.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Broker URL selecting the queue backend:
    /// `redis://host:port/db` or `unix_socket:///some/private/dir`.
    pub broker_url: String,
    /// Maximum number of user jobs running concurrently. System jobs are not
    /// counted against this ceiling.
    pub max_user_jobs: usize,
    /// Path of the JSON file store used by the reference binary. Embedders
    /// providing their own `JobStore` ignore this.
    pub store_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            broker_url: "unix_socket:///tmp/jobd".to_owned(),
            max_user_jobs: 8,
            store_path: PathBuf::from("jobs.json"),
        }
    }
}

impl SchedulerConfig {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_user_jobs(mut self, max: usize) -> Self {
        self.max_user_jobs = max;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }
}
