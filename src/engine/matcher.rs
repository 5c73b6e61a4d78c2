//! Matching trade amounts against the codes expected for pending identities.

use super::code::CodeGenerator;
use super::pending::PendingStore;
use crate::domain::{Auction, Identity, LinkId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// A trade observed close to a bucket boundary is also checked against the previous bucket.
pub const LATENCY_GRACE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMatch {
    pub identity: Identity,
    pub link_id: LinkId,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct AmountMatcher {
    pending: Arc<PendingStore>,
    codes: CodeGenerator,
}

impl AmountMatcher {
    pub fn new(pending: Arc<PendingStore>, codes: CodeGenerator) -> Self {
        Self { pending, codes }
    }

    /// Codes accepted at `now`: the current bucket's and the one five minutes earlier.
    pub fn expected_codes(&self, identity: &str, link_id: LinkId, now: DateTime<Utc>) -> [i32; 2] {
        [
            self.codes.code(identity, link_id, now),
            self.codes
                .code(identity, link_id, now - Duration::seconds(LATENCY_GRACE_SECS)),
        ]
    }

    /// Check one (identity, amount) pair; `None` when nothing is pending or the amount is wrong.
    pub fn check(&self, identity: &str, amount: i64, now: DateTime<Utc>) -> Option<CodeMatch> {
        let entry = self.pending.get(identity)?;
        let expected = self.expected_codes(entry.identity.as_str(), entry.link_id, now);
        tracing::debug!(
            "Checking amount {} for {} against {:?}",
            amount,
            entry.identity,
            expected
        );

        expected
            .iter()
            .any(|code| i64::from(*code) == amount)
            .then(|| CodeMatch {
                identity: entry.identity,
                link_id: entry.link_id,
                amount,
            })
    }

    /// A new sale is matched on its seller and starting bid.
    pub fn match_sale(&self, auction: &Auction, now: DateTime<Utc>) -> Option<CodeMatch> {
        let seller = auction.seller()?;
        self.check(seller, auction.starting_bid, now)
    }

    /// Every bid of an auction is matched on its bidder and amount.
    pub fn match_bids(&self, auction: &Auction, now: DateTime<Utc>) -> Vec<CodeMatch> {
        auction
            .bids
            .iter()
            .filter_map(|bid| self.check(bid.bidder()?, bid.amount, now))
            .collect()
    }
}
