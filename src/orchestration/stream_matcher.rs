use super::connect::{ConnectError, ConnectService};
use super::consumer::run_consumer;
use super::supervisor::SupervisorError;
use crate::domain::{Auction, VerificationEvent};
use crate::engine::{AmountMatcher, CodeMatch};
use crate::stream::EventStream;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Verifies pending links from the sale and bid streams.
#[derive(Clone)]
pub struct StreamMatcher {
    matcher: AmountMatcher,
    connect: Arc<ConnectService>,
}

impl StreamMatcher {
    pub fn new(connect: Arc<ConnectService>) -> Self {
        let matcher = AmountMatcher::new(connect.pending().clone(), connect.codes().clone());
        Self { matcher, connect }
    }

    pub async fn handle_sale(
        &self,
        auction: &Auction,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationEvent>, ConnectError> {
        let found = self.matcher.match_sale(auction, now);
        self.commit(found.into_iter().collect(), now).await
    }

    pub async fn handle_bids(
        &self,
        auction: &Auction,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationEvent>, ConnectError> {
        let found = self.matcher.match_bids(auction, now);
        self.commit(found, now).await
    }

    async fn commit(
        &self,
        found: Vec<CodeMatch>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerificationEvent>, ConnectError> {
        let mut events = Vec::new();
        for m in found {
            tracing::debug!(identity = %m.identity, amount = m.amount, "Code matched");
            if let Some(event) = self
                .connect
                .validated_link(&m.identity, m.link_id, now)
                .await?
            {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub async fn consume_sales(
        self,
        stream: EventStream,
        cancel: CancellationToken,
    ) -> Result<(), SupervisorError> {
        run_consumer("new-auction", stream, cancel, |auction| {
            let this = self.clone();
            async move { this.handle_sale(&auction, Utc::now()).await.map(|_| ()) }
        })
        .await
    }

    pub async fn consume_bids(
        self,
        stream: EventStream,
        cancel: CancellationToken,
    ) -> Result<(), SupervisorError> {
        run_consumer("new-bid", stream, cancel, |auction| {
            let this = self.clone();
            async move { this.handle_bids(&auction, Utc::now()).await.map(|_| ()) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, Repository};
    use crate::domain::{Bid, Identity, UserId};
    use crate::engine::{CodeGenerator, PendingStore};
    use crate::metrics::NoopMetrics;
    use crate::stream::RecordingPublisher;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn setup() -> (StreamMatcher, Arc<RecordingPublisher>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let publisher = Arc::new(RecordingPublisher::new());
        let connect = Arc::new(ConnectService::new(
            Arc::new(Repository::new(pool)),
            Arc::new(PendingStore::new()),
            CodeGenerator::new("s3cr3t"),
            publisher.clone(),
            "verified".to_string(),
            Arc::new(NoopMetrics),
        ));
        (StreamMatcher::new(connect), publisher, temp_dir)
    }

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    async fn request(matcher: &StreamMatcher, identity: &str) -> i32 {
        let identity = Identity::new(identity).unwrap();
        matcher
            .connect
            .register_or_refresh_at(&UserId::new("42").unwrap(), &identity, t(10, 0))
            .await
            .unwrap()
            .code
    }

    #[tokio::test]
    async fn test_sale_with_code_verifies() {
        let (matcher, publisher, _temp) = setup().await;
        let code = request(&matcher, "abc-uuid").await;

        let wrong = Auction {
            auctioneer_id: Some("abc-uuid".to_string()),
            starting_bid: i64::from(code) + 1,
            ..Default::default()
        };
        assert!(matcher.handle_sale(&wrong, t(10, 1)).await.unwrap().is_empty());
        assert!(publisher.published().is_empty());

        let right = Auction {
            starting_bid: i64::from(code),
            ..wrong
        };
        let events = matcher.handle_sale(&right, t(10, 1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "42");
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_bid_with_code_verifies() {
        let (matcher, publisher, _temp) = setup().await;
        let code = request(&matcher, "abc-uuid").await;

        let auction = Auction {
            uuid: "lot".to_string(),
            bids: vec![Bid {
                bidder: Some("abc-uuid".to_string()),
                amount: i64::from(code),
                timestamp: t(10, 1),
            }],
            ..Default::default()
        };
        assert_eq!(matcher.handle_bids(&auction, t(10, 1)).await.unwrap().len(), 1);
        // Redelivery changes nothing.
        assert!(matcher.handle_bids(&auction, t(10, 2)).await.unwrap().is_empty());
        assert_eq!(publisher.published().len(), 1);
    }
}
