//! Purchase challenges: verification through a designated auction.

use super::{Identity, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's commitment to buy a specific auction with a specific identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: i64,
    pub minecraft_uuid: Identity,
    /// Designated auction; unique across challenges.
    pub auction_uuid: String,
    pub bought_by: Option<Identity>,
    pub created_at: DateTime<Utc>,
    pub bought_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once the designated auction has closed, whatever the outcome.
    pub closed_at: Option<DateTime<Utc>>,
    pub user_id: UserId,
}

impl Challenge {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// A challenge that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChallenge {
    pub user_id: UserId,
    pub minecraft_uuid: Identity,
    pub auction_uuid: String,
}
