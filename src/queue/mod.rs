//! Inter-process command transport between job producers and the scheduler.
//!
//! Three interchangeable backends behind one closed enum: an in-memory mock
//! for tests, a connection-oriented Unix-domain-socket backend, and a Redis
//! list backend. Delivery is best-effort by design: commands are wakeup
//! hints, the job store is the source of truth.

pub mod mock;
pub mod redis;
pub mod unix;

use std::time::Duration;

pub use mock::MockQueue;
pub use redis::RedisQueue;
pub use unix::UnixSocketQueue;

use crate::command::Command;
use crate::error::{JobdError, Result};
use crate::job::{Job, JobId};

/// User-facing message for producer-side probe failures. The exact wording
/// is a contract: the web layer shows it verbatim to end users.
pub(crate) fn manager_unreachable(detail: &str) -> String {
    format!("The job manager does not respond, please contact your administrator ({detail})")
}

/// The active queue backend, selected once at startup from the broker URL
/// scheme and injected into the scheduler.
pub enum CommandQueue {
    Mock(MockQueue),
    Unix(UnixSocketQueue),
    Redis(RedisQueue),
}

impl CommandQueue {
    /// Select a backend from a broker URL. An unrecognized scheme is a fatal
    /// configuration error, raised here rather than at first use.
    pub fn from_broker_url(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("unix_socket://") {
            if path.is_empty() {
                return Err(JobdError::Config(format!("empty unix_socket path: {url:?}")));
            }
            Ok(CommandQueue::Unix(UnixSocketQueue::new(path)))
        } else if url.starts_with("redis://") {
            Ok(CommandQueue::Redis(RedisQueue::new(url)?))
        } else {
            Err(JobdError::Config(format!("unknown broker scheme: {url:?}")))
        }
    }

    /// Idempotently reset/initialize the transport. Called once at scheduler
    /// startup; failures are fatal.
    pub async fn clear(&mut self) -> Result<()> {
        match self {
            CommandQueue::Mock(q) => {
                q.clear();
                Ok(())
            }
            CommandQueue::Unix(q) => q.clear(),
            CommandQueue::Redis(q) => q.clear().await,
        }
    }

    /// Release transport resources on shutdown. Best-effort.
    pub async fn destroy(&mut self) {
        match self {
            CommandQueue::Mock(q) => q.clear(),
            CommandQueue::Unix(q) => q.destroy(),
            CommandQueue::Redis(q) => q.destroy(),
        }
    }

    /// Enqueue a START command for `job`. A transport failure surfaces as an
    /// error value so the producer can report it without a crash.
    pub async fn start_job(&self, job: &Job) -> Result<()> {
        match self {
            CommandQueue::Mock(q) => q.start_job(job),
            CommandQueue::Unix(q) => q.start_job(job).await,
            CommandQueue::Redis(q) => q.start_job(job).await,
        }
    }

    /// Enqueue an END command. Fire-and-forget: the job row already carries
    /// the final status, so a lost END only delays slot release until the
    /// scheduler restarts.
    pub async fn end_job(&self, job_id: JobId) {
        match self {
            CommandQueue::Mock(q) => q.end_job(job_id),
            CommandQueue::Unix(q) => q.end_job(job_id).await,
            CommandQueue::Redis(q) => q.end_job(job_id).await,
        }
    }

    /// Enqueue a REFRESH command carrying changed field values.
    pub async fn refresh_job(
        &self,
        job_id: JobId,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        match self {
            CommandQueue::Mock(q) => q.refresh_job(job_id, fields),
            CommandQueue::Unix(q) => q.refresh_job(job_id, fields).await,
            CommandQueue::Redis(q) => q.refresh_job(job_id, fields).await,
        }
    }

    /// Wait up to `timeout` for the next inbound command; `None` timeout
    /// waits with no ceiling. Returns `Ok(None)` on timeout or on a
    /// malformed message (logged). Transport errors propagate: the scheduler
    /// loop treats them as fatal and relies on process supervision.
    pub async fn get_command(&mut self, timeout: Option<Duration>) -> Result<Option<Command>> {
        match self {
            CommandQueue::Mock(q) => q.get_command(timeout).await,
            CommandQueue::Unix(q) => q.get_command(timeout).await,
            CommandQueue::Redis(q) => q.get_command(timeout).await,
        }
    }

    /// Synchronously check scheduler liveness. On failure the returned
    /// string is human-readable and suitable for direct display.
    pub async fn ping(&self) -> std::result::Result<(), String> {
        match self {
            CommandQueue::Mock(q) => q.ping().await,
            CommandQueue::Unix(q) => q.ping().await,
            CommandQueue::Redis(q) => q.ping().await,
        }
    }

    /// Scheduler-side reply to a received PING.
    pub async fn pong(&mut self, ping: &Command) {
        match self {
            CommandQueue::Mock(q) => q.pong(ping),
            CommandQueue::Unix(q) => q.pong(ping).await,
            CommandQueue::Redis(q) => q.pong(ping).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_scheme_selection() {
        assert!(matches!(
            CommandQueue::from_broker_url("unix_socket:///tmp/jobd"),
            Ok(CommandQueue::Unix(_))
        ));
        assert!(matches!(
            CommandQueue::from_broker_url("redis://127.0.0.1:6379/0"),
            Ok(CommandQueue::Redis(_))
        ));
    }

    #[test]
    fn unknown_scheme_is_a_config_error() {
        for url in ["amqp://x", "unix_socket://", "jobs"] {
            assert!(matches!(
                CommandQueue::from_broker_url(url),
                Err(JobdError::Config(_))
            ));
        }
    }
}
