use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `cancelation` when the process is asked to stop: Ctrl-C anywhere, SIGTERM on unix.
/// The CLI's `shutdown` command sends SIGTERM, so both paths end in the same orderly flush.
///
/// Returns early without cancelling if `cancelation` is cancelled by someone else.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            cancelation.cancel();
        },
        _ = terminate() => {
            info!("Received SIGTERM, shutting down");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to listen for SIGTERM {e:?}");
            std::future::pending::<()>().await
        }
    }
}

/// On Windows detached processes can't detect signals sent to them, so only Ctrl-C is watched.
#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
