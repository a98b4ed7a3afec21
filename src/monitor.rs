//! Shutdown signal handling.

use futures::future::{self, Either, FutureExt};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

/// Resolves when the process receives `SIGTERM` or `SIGINT`.
///
/// If signal handlers cannot be installed the future never resolves and
/// the daemon keeps serving; the failure is logged.
pub async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!("failed to install signal handlers: {}", e);
            return future::pending().await;
        }
    };

    let signal_name = match future::select(sigterm.recv().boxed(), sigint.recv().boxed()).await {
        Either::Left(..) => "SIGTERM",
        Either::Right(..) => "SIGINT",
    };

    info!("received {}, exiting", signal_name);
}
