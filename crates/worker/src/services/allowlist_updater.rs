use crate::state::WorkerState;
use log::{debug, error, info};
use shared::network::NetworkSource;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Keeps the worker's validator allow-list in step with the network.
pub(crate) struct AllowlistUpdater {
    network: Arc<dyn NetworkSource>,
    state: Arc<WorkerState>,
    min_stake: f64,
    interval: Duration,
}

impl AllowlistUpdater {
    pub(crate) fn new(
        network: Arc<dyn NetworkSource>,
        state: Arc<WorkerState>,
        min_stake: f64,
        interval: Duration,
    ) -> Self {
        Self {
            network,
            state,
            min_stake,
            interval,
        }
    }

    /// Refreshes once, then every `interval` until cancelled. Failed
    /// refreshes keep the previous allow-list.
    pub(crate) fn start(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Starting allow-list refresh task");
            loop {
                self.refresh().await;
                tokio::select! {
                    _ = sleep(self.interval) => {},
                    _ = cancellation_token.cancelled() => break,
                }
            }
            debug!("Allow-list refresh task finished");
        })
    }

    async fn refresh(&self) {
        match self.network.snapshot().await {
            Ok(snapshot) => {
                self.state
                    .replace_validators(&snapshot, self.min_stake)
                    .await;
                info!("Refreshed validator allow-list at block {}", snapshot.block);
            }
            Err(e) => error!("Failed to refresh validator allow-list: {e:#}"),
        }
    }
}
