//! Interrupt handling for a run.
//!
//! The first SIGINT/SIGTERM cancels the run so it can clean up. A second one
//! while cleanup is still going means the operator wants out now.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancel `cancel` on the first signal from `next_signal`, then resolve on the
/// second. Returning `Ok` means the caller should exit without waiting.
pub async fn watch_interrupts<S, F>(mut next_signal: S, cancel: CancellationToken) -> Result<()>
where
    S: FnMut() -> F,
    F: Future<Output = Result<()>>,
{
    next_signal().await?;
    warn!("interrupted; aborting run and cleaning up (interrupt again to exit now)");
    cancel.cancel();

    next_signal().await?;
    warn!("interrupted again; exiting before cleanup finished");
    Ok(())
}

/// Resolve on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => result,
        result = terminate => result,
    }
}
