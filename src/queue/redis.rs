use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::command::Command;
use crate::error::{JobdError, Result};
use crate::job::{Job, JobId};
use crate::queue::manager_unreachable;

/// Well-known list key carrying serialized commands.
const COMMANDS_KEY: &str = "creme_jobs";
/// PONG replies round-trip through short-lived keys polled by the requester.
const PONG_KEY_PREFIX: &str = "creme_jobs_pong-";
const PONG_KEY_TTL_SECS: u64 = 10;

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const PING_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Redis list backend: producers LPUSH onto a single well-known key, the
/// scheduler consumes it with a blocking BRPOP.
///
/// Deliberately not a durable queue. Commands are wakeup hints and the job
/// store is the source of truth, so a lost message costs at worst a delayed
/// wakeup, never a lost job.
pub struct RedisQueue {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisQueue {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| JobdError::Config(format!("invalid redis URL {url:?}: {e}")))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }

    pub async fn clear(&mut self) -> Result<()> {
        let mut conn = self
            .conn()
            .await
            .map_err(|e| JobdError::Config(format!("cannot reach redis broker: {e}")))?;
        let _: () = conn
            .del(COMMANDS_KEY)
            .await
            .map_err(|e| JobdError::Config(format!("cannot reset {COMMANDS_KEY:?}: {e}")))?;
        Ok(())
    }

    pub fn destroy(&mut self) {
        // No OS resources to release; dropping the connection is enough.
        self.conn = OnceCell::new();
    }

    async fn push(&self, wire: &str) -> Result<()> {
        let mut conn = self
            .conn()
            .await
            .map_err(|e| JobdError::Transport(e.to_string()))?;
        let _: () = conn
            .lpush(COMMANDS_KEY, wire)
            .await
            .map_err(|e| JobdError::Transport(e.to_string()))?;
        Ok(())
    }

    pub async fn start_job(&self, job: &Job) -> Result<()> {
        self.push(&Command::Start { job_id: job.id }.to_wire()).await
    }

    pub async fn end_job(&self, job_id: JobId) {
        if let Err(e) = self.push(&Command::End { job_id }.to_wire()).await {
            tracing::warn!(job_id, error = %e, "Could not send END command");
        }
    }

    pub async fn refresh_job(
        &self,
        job_id: JobId,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.push(&Command::Refresh { job_id, fields }.to_wire())
            .await
    }

    /// Blocking right-pop on the command list. `None` timeout maps to
    /// BRPOP's native "0 = wait forever". Broker errors propagate: losing
    /// the consuming connection is fatal for the scheduler loop.
    pub async fn get_command(&mut self, timeout: Option<Duration>) -> Result<Option<Command>> {
        let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = conn.brpop(COMMANDS_KEY, secs).await?;

        match popped {
            None => Ok(None),
            Some((_, raw)) => match Command::from_wire(&raw) {
                Ok(cmd) => Ok(Some(cmd)),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed queue message");
                    Ok(None)
                }
            },
        }
    }

    pub async fn pong(&mut self, ping: &Command) {
        let Command::Ping { token } = ping else {
            tracing::warn!(?ping, "pong() called with a non-PING command");
            return;
        };
        let key = format!("{PONG_KEY_PREFIX}{token}");
        match self.conn().await {
            Ok(mut conn) => {
                let res: redis::RedisResult<()> = conn.set_ex(&key, "PONG", PONG_KEY_TTL_SECS).await;
                if let Err(e) = res {
                    tracing::warn!(token, error = %e, "Could not answer PING");
                }
            }
            Err(e) => tracing::warn!(token, error = %e, "Could not answer PING"),
        }
    }

    /// Push a PING and poll for the matching PONG key.
    pub async fn ping(&self) -> std::result::Result<(), String> {
        let token = Uuid::new_v4().to_string();
        let key = format!("{PONG_KEY_PREFIX}{token}");

        self.push(&Command::Ping { token }.to_wire())
            .await
            .map_err(|e| manager_unreachable(&e.to_string()))?;

        let mut conn = self
            .conn()
            .await
            .map_err(|e| manager_unreachable(&e.to_string()))?;

        let deadline = tokio::time::Instant::now() + PING_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            let reply: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| manager_unreachable(&e.to_string()))?;
            if reply.is_some() {
                let _: redis::RedisResult<()> = conn.del(&key).await;
                return Ok(());
            }
            tokio::time::sleep(PING_POLL_INTERVAL).await;
        }
        Err(manager_unreachable("timed out waiting for PONG"))
    }
}
