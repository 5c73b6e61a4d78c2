use crate::db::Repository;
use crate::domain::{
    ConnectionRequest, Identity, LinkId, PrimitiveParseError, User, UserId, VerificationEvent,
};
use crate::engine::{CodeGenerator, PendingEntry, PendingStore};
use crate::metrics::{MetricEvent, Metrics};
use crate::stream::EventPublisher;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Added to the validity window when reloading the cache at startup.
pub const WARM_UP_SLACK_MINUTES: i64 = 5;
/// A verified link can only be removed once it has been untouched this long.
pub const REMOVAL_COOLDOWN_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("link was verified too recently, {days_remaining} days remaining")]
    TooRecent { days_remaining: i64 },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<PrimitiveParseError> for ConnectError {
    fn from(err: PrimitiveParseError) -> Self {
        ConnectError::InvalidInput(err.to_string())
    }
}

/// Link lifecycle: requests, verification and removal.
pub struct ConnectService {
    repo: Arc<Repository>,
    pending: Arc<PendingStore>,
    codes: CodeGenerator,
    publisher: Arc<dyn EventPublisher>,
    verified_topic: String,
    metrics: Arc<dyn Metrics>,
}

impl ConnectService {
    pub fn new(
        repo: Arc<Repository>,
        pending: Arc<PendingStore>,
        codes: CodeGenerator,
        publisher: Arc<dyn EventPublisher>,
        verified_topic: String,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            repo,
            pending,
            codes,
            publisher,
            verified_topic,
            metrics,
        }
    }

    pub fn pending(&self) -> &Arc<PendingStore> {
        &self.pending
    }

    pub fn codes(&self) -> &CodeGenerator {
        &self.codes
    }

    /// Request (or re-request) a link and return the code to trade.
    pub async fn register_or_refresh(
        &self,
        user_id: &str,
        identity: &str,
    ) -> Result<ConnectionRequest, ConnectError> {
        let user_id = UserId::new(user_id)?;
        let identity = Identity::new(identity)?;
        self.register_or_refresh_at(&user_id, &identity, Utc::now())
            .await
    }

    pub async fn register_or_refresh_at(
        &self,
        user_id: &UserId,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<ConnectionRequest, ConnectError> {
        let user = self.repo.get_or_create_user(user_id).await?;

        let link = match user.account(identity) {
            Some(existing) => {
                self.repo.touch_link(existing.id, now).await?;
                let mut link = existing.clone();
                link.last_requested_at = now;
                link
            }
            None => self.repo.insert_link(user.id, identity, now).await?,
        };

        self.pending.upsert(PendingEntry::from(&link));
        self.metrics.record(MetricEvent::ConnectionAttempt);

        let code = self.codes.code(identity.as_str(), link.id, now);
        tracing::info!(
            user = %user_id,
            identity = %identity,
            link_id = %link.id,
            verified = link.verified,
            "Connection requested"
        );

        Ok(ConnectionRequest {
            code,
            is_connected: link.verified,
        })
    }

    /// Reload unverified links requested within `validity_window` (plus slack)
    /// into the pending cache.
    pub async fn warm_up(
        &self,
        now: DateTime<Utc>,
        validity_window: std::time::Duration,
    ) -> Result<usize, ConnectError> {
        let window = Duration::from_std(validity_window).map_err(|_| {
            ConnectError::InvalidInput("validity window out of range".to_string())
        })?;
        let cutoff = now - window - Duration::minutes(WARM_UP_SLACK_MINUTES);
        let links = self.repo.recent_unverified_links(cutoff).await?;
        for link in &links {
            self.pending.upsert(PendingEntry::from(link));
        }
        tracing::info!("Warmed pending cache with {} links", links.len());
        Ok(links.len())
    }

    /// Commit a verified link and announce it.
    ///
    /// Returns the published event, or `None` when the link no longer exists
    /// or had already been verified.
    pub async fn validated_link(
        &self,
        identity: &Identity,
        link_id: LinkId,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationEvent>, ConnectError> {
        let Some(verified) = self.repo.verify_link(link_id, now).await? else {
            tracing::warn!(link_id = %link_id, "Matched link no longer exists");
            self.pending.remove_link(identity.as_str(), link_id);
            return Ok(None);
        };
        self.pending.mark_verified(identity.as_str(), link_id, now);

        if !verified.newly_verified {
            tracing::debug!(link_id = %link_id, "Link already verified");
            return Ok(None);
        }

        self.metrics.record(MetricEvent::Verification);
        let event = VerificationEvent {
            user_id: verified.owner.to_string(),
            minecraft_uuid: verified.link.identity.to_string(),
            existing_con_count: verified.verified_count,
        };
        tracing::info!(
            user = %event.user_id,
            identity = %event.minecraft_uuid,
            existing = event.existing_con_count,
            "Link verified"
        );

        self.publish(&event).await;
        Ok(Some(event))
    }

    // Publish failures never undo a committed verification.
    async fn publish(&self, event: &VerificationEvent) {
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to encode verification event: {}", e);
                self.metrics.record(MetricEvent::PublishFailure);
                return;
            }
        };

        if let Err(e) = self
            .publisher
            .publish(&self.verified_topic, &event.key(), value)
            .await
        {
            tracing::error!(
                topic = %self.verified_topic,
                key = %event.key(),
                "Failed to publish verification: {}",
                e
            );
            self.metrics.record(MetricEvent::PublishFailure);
        }
    }

    /// Verify a user's link without a matching trade.
    pub async fn force_verify(
        &self,
        user_id: &UserId,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<User, ConnectError> {
        let (_, link_id) = self.find_link(user_id, identity).await?;
        self.validated_link(identity, link_id, now).await?;
        self.repo
            .find_user(user_id)
            .await?
            .ok_or_else(|| ConnectError::NotFound(format!("user {}", user_id)))
    }

    /// Verifies the user's pending link for `identity` if one exists.
    ///
    /// Returns whether such a link was found.
    pub async fn verify_if_linked(
        &self,
        user_id: &UserId,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<bool, ConnectError> {
        match self.find_link(user_id, identity).await {
            Ok((_, link_id)) => {
                self.validated_link(identity, link_id, now).await?;
                Ok(true)
            }
            Err(ConnectError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a link. Verified links must have been untouched for 30 days.
    pub async fn remove_link(
        &self,
        user_id: &UserId,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(), ConnectError> {
        let (user, link_id) = self.find_link(user_id, identity).await?;
        let unlock_at = user
            .account(identity)
            .filter(|link| link.verified)
            .map(|link| link.updated_at + Duration::days(REMOVAL_COOLDOWN_DAYS));

        if let Some(unlock_at) = unlock_at {
            if unlock_at > now {
                return Err(ConnectError::TooRecent {
                    days_remaining: days_until(now, unlock_at),
                });
            }
        }

        self.repo.delete_link(link_id).await?;
        self.pending.remove_link(identity.as_str(), link_id);
        tracing::info!(user = %user_id, identity = %identity, "Link removed");
        Ok(())
    }

    async fn find_link(
        &self,
        user_id: &UserId,
        identity: &Identity,
    ) -> Result<(User, LinkId), ConnectError> {
        let user = self
            .repo
            .find_user(user_id)
            .await?
            .ok_or_else(|| ConnectError::NotFound(format!("user {}", user_id)))?;
        let link_id = user
            .account(identity)
            .map(|link| link.id)
            .ok_or_else(|| {
                ConnectError::NotFound(format!("account {} of user {}", identity, user_id))
            })?;
        Ok((user, link_id))
    }
}

/// Whole days until `until`, rounded up.
fn days_until(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let secs = (until - now).num_seconds().max(0);
    (secs + 86_399) / 86_400
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::metrics::CounterMetrics;
    use crate::stream::RecordingPublisher;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Harness {
        service: ConnectService,
        publisher: Arc<RecordingPublisher>,
        metrics: Arc<CounterMetrics>,
        repo: Arc<Repository>,
        _temp: TempDir,
    }

    async fn setup() -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let publisher = Arc::new(RecordingPublisher::new());
        let metrics = Arc::new(CounterMetrics::new());
        let service = ConnectService::new(
            repo.clone(),
            Arc::new(PendingStore::new()),
            CodeGenerator::new("s3cr3t"),
            publisher.clone(),
            "verified".to_string(),
            metrics.clone(),
        );
        Harness {
            service,
            publisher,
            metrics,
            repo,
            _temp: temp_dir,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn uid() -> UserId {
        UserId::new("42").unwrap()
    }

    fn ident() -> Identity {
        Identity::new("abc-uuid").unwrap()
    }

    #[tokio::test]
    async fn test_register_rejects_empty_input() {
        let h = setup().await;
        let err = h.service.register_or_refresh("  ", "abc").await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidInput(_)));
        let err = h.service.register_or_refresh("42", "").await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_refresh_reuses_link_and_updates_pending() {
        let h = setup().await;
        let first = h
            .service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        assert!(!first.is_connected);
        let link_id = h.service.pending().get("abc-uuid").unwrap().link_id;

        let later = t0() + Duration::minutes(4);
        h.service
            .register_or_refresh_at(&uid(), &ident(), later)
            .await
            .unwrap();

        let entry = h.service.pending().get("abc-uuid").unwrap();
        assert_eq!(entry.link_id, link_id);
        assert_eq!(entry.last_requested_at, later);
        assert_eq!(h.metrics.snapshot().connection_attempts, 2);

        let user = h.repo.find_user(&uid()).await.unwrap().unwrap();
        assert_eq!(user.accounts.len(), 1);
    }

    #[tokio::test]
    async fn test_validated_link_publishes_once() {
        let h = setup().await;
        h.service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        let link_id = h.service.pending().get("abc-uuid").unwrap().link_id;

        let event = h
            .service
            .validated_link(&ident(), link_id, t0())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.existing_con_count, 1);
        assert!(h
            .service
            .validated_link(&ident(), link_id, t0())
            .await
            .unwrap()
            .is_none());

        let published = h.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "verified");
        assert_eq!(published[0].key, "abc-uuid-42");
        assert!(h.service.pending().get("abc-uuid").unwrap().verified);

        let again = h
            .service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        assert!(again.is_connected);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_verification() {
        let h = setup().await;
        h.publisher.set_failing(true);
        h.service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        let link_id = h.service.pending().get("abc-uuid").unwrap().link_id;

        assert!(h
            .service
            .validated_link(&ident(), link_id, t0())
            .await
            .unwrap()
            .is_some());
        assert!(h.repo.get_link(link_id).await.unwrap().unwrap().verified);
        assert_eq!(h.metrics.snapshot().publish_failures, 1);
    }

    #[tokio::test]
    async fn test_remove_verified_link_enforces_cooldown() {
        let h = setup().await;
        h.service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        h.service.force_verify(&uid(), &ident(), t0()).await.unwrap();

        let err = h
            .service
            .remove_link(&uid(), &ident(), t0() + Duration::days(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::TooRecent { days_remaining: 20 }));

        let err = h
            .service
            .remove_link(&uid(), &ident(), t0() + Duration::days(29) + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::TooRecent { days_remaining: 1 }));

        h.service
            .remove_link(&uid(), &ident(), t0() + Duration::days(30))
            .await
            .unwrap();
        assert!(h.service.pending().get("abc-uuid").is_none());
    }

    #[tokio::test]
    async fn test_remove_unverified_link_immediately() {
        let h = setup().await;
        h.service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        h.service.remove_link(&uid(), &ident(), t0()).await.unwrap();
        let err = h
            .service
            .remove_link(&uid(), &ident(), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_warm_up_loads_recent_requests() {
        let h = setup().await;
        h.service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        h.service.pending().remove("abc-uuid");

        let window = std::time::Duration::from_secs(600);
        assert_eq!(h.service.warm_up(t0() + Duration::minutes(20), window).await.unwrap(), 0);
        assert_eq!(h.service.warm_up(t0() + Duration::minutes(10), window).await.unwrap(), 1);
        assert!(h.service.pending().get("abc-uuid").is_some());
    }

    #[tokio::test]
    async fn test_warm_up_follows_longer_window() {
        let h = setup().await;
        h.service
            .register_or_refresh_at(&uid(), &ident(), t0())
            .await
            .unwrap();
        h.service.pending().remove("abc-uuid");

        let hour = std::time::Duration::from_secs(3_600);
        let later = t0() + Duration::minutes(50);
        assert_eq!(h.service.warm_up(later, hour).await.unwrap(), 1);
        assert!(h.service.pending().get("abc-uuid").is_some());
    }

    #[test]
    fn test_days_until_rounds_up() {
        assert_eq!(days_until(t0(), t0() + Duration::days(2)), 2);
        assert_eq!(days_until(t0(), t0() + Duration::days(2) + Duration::seconds(1)), 3);
        assert_eq!(days_until(t0(), t0() - Duration::days(1)), 0);
    }
}
