//! Long-running verification tasks and the service layer they share.

pub mod challenges;
pub mod connect;
pub mod consumer;
pub mod eviction;
pub mod stream_matcher;
pub mod supervisor;

pub use challenges::{ChallengeOutcome, ChallengeTracker};
pub use connect::{ConnectError, ConnectService};
pub use eviction::EvictionLoop;
pub use stream_matcher::StreamMatcher;
pub use supervisor::{Supervisor, SupervisorError};

use crate::stream::{EventSource, EventStream};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Topics consumed by the verification tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub new_auction: String,
    pub new_bid: String,
    pub sold_auction: String,
}

async fn subscribe(source: &dyn EventSource, topic: &str) -> Result<EventStream, SupervisorError> {
    source
        .subscribe(topic)
        .await
        .map_err(|source| SupervisorError::Subscribe {
            topic: topic.to_string(),
            source,
        })
}

/// Subscribe to every topic and spawn the consumers plus the eviction sweep.
///
/// Await [`Supervisor::run`] on the result; it returns once any task stops.
pub async fn start_verification(
    source: Arc<dyn EventSource>,
    matcher: StreamMatcher,
    tracker: Arc<ChallengeTracker>,
    eviction: EvictionLoop,
    topics: &Topics,
    cancel: CancellationToken,
) -> Result<Supervisor, SupervisorError> {
    let sales = subscribe(source.as_ref(), &topics.new_auction).await?;
    let bids = subscribe(source.as_ref(), &topics.new_bid).await?;
    let sold = subscribe(source.as_ref(), &topics.sold_auction).await?;

    let mut supervisor = Supervisor::new(cancel.clone());
    supervisor.spawn(
        "new-auction",
        matcher.clone().consume_sales(sales, cancel.clone()),
    );
    supervisor.spawn("new-bid", matcher.consume_bids(bids, cancel.clone()));
    supervisor.spawn("sold-auction", tracker.consume(sold, cancel.clone()));
    supervisor.spawn("eviction", eviction.run(cancel));

    tracing::info!(
        "Verification started on {}, {} and {}",
        topics.new_auction,
        topics.new_bid,
        topics.sold_auction
    );
    Ok(supervisor)
}
