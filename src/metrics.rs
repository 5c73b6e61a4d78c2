//! Counters for the verification pipeline.
//!
//! Components receive an `Arc<dyn Metrics>`; tests pass [`NoopMetrics`] or
//! inspect a [`CounterMetrics`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    ConnectionAttempt,
    Verification,
    PublishFailure,
    ChallengeCompleted,
    ChallengeAggregateCompleted,
    PendingEvicted(u64),
}

pub trait Metrics: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record(&self, _event: MetricEvent) {}
}

#[derive(Debug, Default)]
pub struct CounterMetrics {
    connection_attempts: AtomicU64,
    verifications: AtomicU64,
    publish_failures: AtomicU64,
    challenges_completed: AtomicU64,
    challenge_aggregates_completed: AtomicU64,
    pending_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub connection_attempts: u64,
    pub verifications: u64,
    pub publish_failures: u64,
    pub challenges_completed: u64,
    pub challenge_aggregates_completed: u64,
    pub pending_evicted: u64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            verifications: self.verifications.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            challenges_completed: self.challenges_completed.load(Ordering::Relaxed),
            challenge_aggregates_completed: self
                .challenge_aggregates_completed
                .load(Ordering::Relaxed),
            pending_evicted: self.pending_evicted.load(Ordering::Relaxed),
        }
    }
}

impl Metrics for CounterMetrics {
    fn record(&self, event: MetricEvent) {
        let (counter, by) = match event {
            MetricEvent::ConnectionAttempt => (&self.connection_attempts, 1),
            MetricEvent::Verification => (&self.verifications, 1),
            MetricEvent::PublishFailure => (&self.publish_failures, 1),
            MetricEvent::ChallengeCompleted => (&self.challenges_completed, 1),
            MetricEvent::ChallengeAggregateCompleted => {
                (&self.challenge_aggregates_completed, 1)
            }
            MetricEvent::PendingEvicted(n) => (&self.pending_evicted, n),
        };
        counter.fetch_add(by, Ordering::Relaxed);
    }
}
