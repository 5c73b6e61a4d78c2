use super::connect::{ConnectError, ConnectService};
use super::consumer::run_consumer;
use super::supervisor::SupervisorError;
use crate::db::Repository;
use crate::domain::{Auction, Challenge, Identity, NewChallenge, UserId};
use crate::engine::challenge::{aggregate_satisfied, aggregate_window_start};
use crate::engine::{evaluate_close, CloseDecision};
use crate::metrics::{MetricEvent, Metrics};
use crate::stream::EventStream;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a closed auction did to its challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Untracked,
    NoWinner,
    Discarded,
    Completed {
        challenge: Challenge,
        completed_in_window: i64,
        aggregate_satisfied: bool,
    },
}

/// Open challenges indexed by designated auction.
pub struct ChallengeTracker {
    index: DashMap<String, Challenge>,
    repo: Arc<Repository>,
    connect: Arc<ConnectService>,
    metrics: Arc<dyn Metrics>,
}

impl ChallengeTracker {
    pub fn new(
        repo: Arc<Repository>,
        connect: Arc<ConnectService>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            index: DashMap::new(),
            repo,
            connect,
            metrics,
        }
    }

    /// Index every challenge still waiting for its auction to close.
    pub async fn load(&self) -> Result<usize, ConnectError> {
        let open = self.repo.open_challenges().await?;
        let count = open.len();
        for challenge in open {
            self.index.insert(challenge.auction_uuid.clone(), challenge);
        }
        tracing::info!("Loaded {} open challenges", count);
        Ok(count)
    }

    pub async fn register(&self, request: NewChallenge) -> Result<Challenge, ConnectError> {
        self.register_at(request, Utc::now()).await
    }

    pub async fn register_at(
        &self,
        request: NewChallenge,
        now: DateTime<Utc>,
    ) -> Result<Challenge, ConnectError> {
        if request.auction_uuid.trim().is_empty() {
            return Err(ConnectError::InvalidInput(
                "auction uuid must not be empty".to_string(),
            ));
        }

        let challenge = match self.repo.insert_challenge(&request, now).await {
            Ok(challenge) => challenge,
            Err(e) if is_unique_violation(&e) => {
                return Err(ConnectError::Conflict(format!(
                    "auction {} already has a challenge",
                    request.auction_uuid
                )))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            user = %challenge.user_id,
            identity = %challenge.minecraft_uuid,
            auction = %challenge.auction_uuid,
            "Challenge registered"
        );
        self.index
            .insert(challenge.auction_uuid.clone(), challenge.clone());
        Ok(challenge)
    }

    pub fn tracked(&self, auction_uuid: &str) -> Option<Challenge> {
        self.index.get(auction_uuid).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Apply a closed auction to the challenge designating it, if any.
    pub async fn handle_sold(
        &self,
        auction: &Auction,
        now: DateTime<Utc>,
    ) -> Result<ChallengeOutcome, ConnectError> {
        let Some(challenge) = self.tracked(&auction.uuid) else {
            return Ok(ChallengeOutcome::Untracked);
        };

        match evaluate_close(&challenge, auction) {
            CloseDecision::NoWinner => {
                tracing::info!(auction = %auction.uuid, "Challenged auction closed without a winner");
                self.repo.close_unsold_challenge(challenge.id, now).await?;
                self.index.remove(&challenge.auction_uuid);
                Ok(ChallengeOutcome::NoWinner)
            }
            CloseDecision::Stale {
                bought_by,
                bought_at,
            } => {
                tracing::warn!(
                    auction = %auction.uuid,
                    created_at = %challenge.created_at,
                    bought_at = %bought_at,
                    "Discarding challenge registered after the purchase"
                );
                self.discard(&challenge, &bought_by, bought_at, now).await?;
                Ok(ChallengeOutcome::Discarded)
            }
            CloseDecision::WrongBuyer {
                bought_by,
                bought_at,
            } => {
                tracing::warn!(
                    auction = %auction.uuid,
                    expected = %challenge.minecraft_uuid,
                    bought_by = %bought_by,
                    "Discarding challenge bought by someone else"
                );
                self.discard(&challenge, &bought_by, bought_at, now).await?;
                Ok(ChallengeOutcome::Discarded)
            }
            CloseDecision::Complete {
                bought_by,
                bought_at,
            } => self.complete(challenge, bought_by, bought_at, now).await,
        }
    }

    async fn discard(
        &self,
        challenge: &Challenge,
        bought_by: &Identity,
        bought_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ConnectError> {
        self.repo
            .close_challenge(challenge.id, bought_by, bought_at, None, now)
            .await?;
        self.index.remove(&challenge.auction_uuid);
        Ok(())
    }

    async fn complete(
        &self,
        mut challenge: Challenge,
        bought_by: Identity,
        bought_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ChallengeOutcome, ConnectError> {
        self.repo
            .close_challenge(challenge.id, &bought_by, bought_at, Some(now), now)
            .await?;
        self.index.remove(&challenge.auction_uuid);
        self.metrics.record(MetricEvent::ChallengeCompleted);

        challenge.bought_by = Some(bought_by.clone());
        challenge.bought_at = Some(bought_at);
        challenge.completed_at = Some(now);
        challenge.closed_at = Some(now);
        tracing::info!(
            user = %challenge.user_id,
            bought_by = %bought_by,
            auction = %challenge.auction_uuid,
            "Challenge completed"
        );

        if self
            .connect
            .verify_if_linked(&challenge.user_id, &bought_by, now)
            .await?
        {
            tracing::debug!(user = %challenge.user_id, identity = %bought_by, "Verified link through challenge");
        }

        let completed_in_window = self
            .completed_in_window(&challenge.user_id, &bought_by, now)
            .await?;
        let satisfied = aggregate_satisfied(completed_in_window);
        if satisfied {
            self.metrics.record(MetricEvent::ChallengeAggregateCompleted);
            tracing::info!(
                user = %challenge.user_id,
                bought_by = %bought_by,
                completed = completed_in_window,
                "Challenge aggregate satisfied"
            );
        }

        Ok(ChallengeOutcome::Completed {
            challenge,
            completed_in_window,
            aggregate_satisfied: satisfied,
        })
    }

    async fn completed_in_window(
        &self,
        user_id: &UserId,
        bought_by: &Identity,
        now: DateTime<Utc>,
    ) -> Result<i64, ConnectError> {
        Ok(self
            .repo
            .count_completed_challenges(user_id, bought_by, aggregate_window_start(now))
            .await?)
    }

    pub async fn consume(
        self: Arc<Self>,
        stream: EventStream,
        cancel: CancellationToken,
    ) -> Result<(), SupervisorError> {
        run_consumer("sold-auction", stream, cancel, |auction| {
            let this = self.clone();
            async move { this.handle_sold(&auction, Utc::now()).await.map(|_| ()) }
        })
        .await
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
