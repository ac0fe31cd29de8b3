//! Graceful shutdown handling.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancels `cancel` when the process receives Ctrl-C.
///
/// Detection stops at the next probe boundary and the partial results are
/// still reported and saved. The returned task ends once the token is
/// cancelled, whichever way that happens.
pub fn cancel_on_ctrl_c(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => log::warn!("Interrupt received, stopping detection"),
                    Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
                }
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watcher_ends_when_token_cancelled() {
        let cancel = CancellationToken::new();
        let watcher = cancel_on_ctrl_c(cancel.clone());
        cancel.cancel();
        watcher.await.expect("watcher task should finish cleanly");
    }
}
