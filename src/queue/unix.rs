use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::command::{Command, MAX_WIRE_LEN};
use crate::error::{JobdError, Result};
use crate::job::{Job, JobId};
use crate::queue::manager_unreachable;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-oriented Unix-domain-socket backend.
///
/// Every message is a single `send`/`recv` pair on a fresh connection, capped
/// at 512 bytes. PING is the one exception: the scheduler keeps the accepted
/// connection open and writes the raw token bytes back on that same
/// connection as the PONG.
pub struct UnixSocketQueue {
    dir: PathBuf,
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    /// Accepted PING connections held open until `pong` answers them.
    pending_pings: HashMap<String, UnixStream>,
}

impl UnixSocketQueue {
    /// `dir` is a private directory holding the socket file; it is created
    /// (mode 0700) by `clear()` on the scheduler side.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let socket_path = dir.join("jobd.sock");
        Self {
            dir,
            socket_path,
            listener: None,
            pending_pings: HashMap::new(),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| JobdError::Config(format!("cannot create {:?}: {e}", self.dir)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| JobdError::Config(format!("cannot chmod {:?}: {e}", self.dir)))?;
        }

        // A stale socket file from a previous run would make bind() fail.
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(JobdError::Config(format!(
                    "cannot remove stale socket {:?}: {e}",
                    self.socket_path
                )))
            }
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| JobdError::Config(format!("cannot bind {:?}: {e}", self.socket_path)))?;
        self.listener = Some(listener);
        self.pending_pings.clear();
        Ok(())
    }

    pub fn destroy(&mut self) {
        self.listener = None;
        self.pending_pings.clear();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = ?self.socket_path, error = %e, "Socket cleanup failed");
            }
        }
        if let Err(e) = std::fs::remove_dir(&self.dir) {
            tracing::debug!(path = ?self.dir, error = %e, "Socket dir cleanup failed");
        }
    }

    async fn send(&self, wire: &str) -> Result<()> {
        if wire.len() > MAX_WIRE_LEN {
            return Err(JobdError::Transport(format!(
                "message exceeds {MAX_WIRE_LEN} bytes"
            )));
        }
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| JobdError::Transport(e.to_string()))?;
        stream
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| JobdError::Transport(e.to_string()))?;
        Ok(())
    }

    pub async fn start_job(&self, job: &Job) -> Result<()> {
        self.send(&Command::Start { job_id: job.id }.to_wire()).await
    }

    pub async fn end_job(&self, job_id: JobId) {
        if let Err(e) = self.send(&Command::End { job_id }.to_wire()).await {
            // Non-critical: the job row already carries the final status.
            tracing::warn!(job_id, error = %e, "Could not send END command");
        }
    }

    pub async fn refresh_job(
        &self,
        job_id: JobId,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.send(&Command::Refresh { job_id, fields }.to_wire())
            .await
    }

    /// Accept one connection and read one message. `None` timeout waits with
    /// no ceiling. Malformed messages are logged and reported as a timeout.
    pub async fn get_command(&mut self, timeout: Option<Duration>) -> Result<Option<Command>> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| JobdError::Transport("queue not initialized (clear() missing)".into()))?;

        let accepted = match timeout {
            Some(t) => match tokio::time::timeout(t, listener.accept()).await {
                Err(_) => return Ok(None),
                Ok(res) => res?,
            },
            None => listener.accept().await?,
        };
        let (mut stream, _) = accepted;

        let mut buf = [0u8; MAX_WIRE_LEN];
        // A misbehaving client must not take the daemon down; only accept()
        // failures are fatal.
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unreadable connection");
                return Ok(None);
            }
        };
        let raw = String::from_utf8_lossy(&buf[..n]).into_owned();

        match Command::from_wire(&raw) {
            Ok(cmd) => {
                if let Command::Ping { token } = &cmd {
                    // The reply must go back on this same connection.
                    self.pending_pings.insert(token.clone(), stream);
                }
                Ok(Some(cmd))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed queue message");
                Ok(None)
            }
        }
    }

    pub async fn pong(&mut self, ping: &Command) {
        let Command::Ping { token } = ping else {
            tracing::warn!(?ping, "pong() called with a non-PING command");
            return;
        };
        match self.pending_pings.remove(token) {
            Some(mut stream) => {
                if let Err(e) = stream.write_all(token.as_bytes()).await {
                    tracing::warn!(token, error = %e, "Could not answer PING");
                }
            }
            None => tracing::warn!(token, "No held connection for PING token"),
        }
    }

    /// Synchronous liveness probe; the error string is meant to be shown to
    /// an end user as-is.
    pub async fn ping(&self) -> std::result::Result<(), String> {
        let token = Uuid::new_v4().to_string();

        let round_trip = async {
            let mut stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| manager_unreachable(&e.to_string()))?;
            stream
                .write_all(Command::Ping { token: token.clone() }.to_wire().as_bytes())
                .await
                .map_err(|e| manager_unreachable(&e.to_string()))?;

            let mut buf = [0u8; MAX_WIRE_LEN];
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| manager_unreachable(&e.to_string()))?;
            if buf[..n] == *token.as_bytes() {
                Ok(())
            } else {
                Err(manager_unreachable("unexpected PONG payload"))
            }
        };

        match tokio::time::timeout(PING_TIMEOUT, round_trip).await {
            Ok(res) => res,
            Err(_) => Err(manager_unreachable("timed out waiting for PONG")),
        }
    }
}
