//! Persisted users and their links to in-game identities.

use super::{Identity, LinkId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user of the external service together with every identity it asked to link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    pub id: i64,
    pub external_id: UserId,
    pub accounts: Vec<Link>,
}

impl User {
    /// Find the link for an identity, if the user requested one.
    pub fn account(&self, identity: &Identity) -> Option<&Link> {
        self.accounts.iter().find(|a| &a.identity == identity)
    }
}

/// Association between a user and an identity.
///
/// A user may own many links; none of them is "active", verification is per link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(skip)]
    pub id: LinkId,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(rename = "accountUuid")]
    pub identity: Identity,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_requested_at: DateTime<Utc>,
}

/// Answer to a link request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    /// Amount the user has to sell or bid in-game.
    pub code: i32,
    pub is_connected: bool,
}
