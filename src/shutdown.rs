use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Arm the daemon's termination handling and return the token the scheduler
/// loop selects on.
///
/// SIGTERM and SIGINT both cancel the token; the loop then logs the job
/// processes still running and releases the queue transport before exiting.
/// Handler registration happens here, synchronously, so a failure aborts
/// startup instead of leaving a daemon that cannot be stopped cleanly.
pub fn cancel_on_termination() -> Result<CancellationToken> {
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let name = first_termination_signal(sigterm, sigint).await;
        tracing::info!(signal = name, "Termination signal received");
        cancel.cancel();
    });
    Ok(token)
}

async fn first_termination_signal(mut sigterm: Signal, mut sigint: Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sigterm_cancels_the_token() {
        let token = cancel_on_termination().unwrap();
        assert!(!token.is_cancelled());

        // Raise SIGTERM at ourselves; tokio's handler swallows it.
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        tokio::time::timeout(std::time::Duration::from_secs(2), token.cancelled())
            .await
            .unwrap();
    }
}
