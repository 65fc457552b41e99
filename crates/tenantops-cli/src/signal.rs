//! Interrupt signal handling.

use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix;
use tokio_util::sync::CancellationToken;

use crate::TRACING_TARGET_SHUTDOWN;

/// Cancels `token` on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
///
/// Work already in flight finishes; nothing new starts afterwards.
pub async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(
                target: TRACING_TARGET_SHUTDOWN,
                error = %e,
                "Failed to install Ctrl+C handler"
            );
            std::future::pending::<()>().await;
        } else {
            tracing::warn!(
                target: TRACING_TARGET_SHUTDOWN,
                "Received Ctrl+C signal, stopping after work in flight"
            );
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match unix::signal(unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::warn!(
                    target: TRACING_TARGET_SHUTDOWN,
                    "Received SIGTERM signal, stopping after work in flight"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: TRACING_TARGET_SHUTDOWN,
                    error = %e,
                    "Failed to install SIGTERM handler"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = token.cancelled() => return,
        () = terminate => {},
    }

    token.cancel();
}
