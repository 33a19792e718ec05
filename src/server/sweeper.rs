use crate::domain_port::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically deletes expired refresh tokens so the store does not grow with
/// sessions nobody will ever present again.
pub struct RefreshTokenSweeper {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl RefreshTokenSweeper {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            clock,
            interval,
            cancellation_token,
        }
    }

    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        if purged > 0 {
            tracing::info!(purged, "purged expired refresh tokens");
        }
        Ok(purged)
    }

    pub async fn run(&self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("refresh token sweeper shutting down...");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!("refresh token sweep failed: {e:#}");
                    }
                }
            }
        }
    }
}
