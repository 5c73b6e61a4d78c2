use super::supervisor::SupervisorError;
use crate::engine::PendingStore;
use crate::metrics::{MetricEvent, Metrics};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically drops pending entries older than the validity window.
pub struct EvictionLoop {
    pending: Arc<PendingStore>,
    window: chrono::Duration,
    interval: Duration,
    metrics: Arc<dyn Metrics>,
}

impl EvictionLoop {
    pub fn new(
        pending: Arc<PendingStore>,
        window: Duration,
        interval: Duration,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            pending,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            interval,
            metrics,
        }
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.pending.sweep(now, self.window);
        if evicted > 0 {
            self.metrics
                .record(MetricEvent::PendingEvicted(evicted as u64));
            tracing::info!(
                "Evicted {} expired pending entries, {} remaining",
                evicted,
                self.pending.len()
            );
        }
        evicted
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), SupervisorError> {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Eviction loop cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
    }
}
