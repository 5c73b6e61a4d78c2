//! Decisions for purchase challenges when their auction closes.

use crate::domain::{Auction, Challenge, Identity};
use chrono::{DateTime, Duration, Utc};

/// A challenge may be registered at most this long after the winning bid.
pub const STALENESS_TOLERANCE_SECS: i64 = 60;
/// Completed challenges needed within the aggregate window.
pub const AGGREGATE_THRESHOLD: i64 = 3;
pub const AGGREGATE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseDecision {
    /// `bought_by` is the challenged identity as registered.
    Complete {
        bought_by: Identity,
        bought_at: DateTime<Utc>,
    },
    /// Registered after the purchase had already happened.
    Stale {
        bought_by: Identity,
        bought_at: DateTime<Utc>,
    },
    /// Won by someone other than the challenged identity.
    WrongBuyer {
        bought_by: Identity,
        bought_at: DateTime<Utc>,
    },
    NoWinner,
}

/// Decide what a closed auction means for the challenge tracking it.
pub fn evaluate_close(challenge: &Challenge, auction: &Auction) -> CloseDecision {
    let Some(bid) = auction.highest_bid() else {
        return CloseDecision::NoWinner;
    };
    let Some(bought_by) = bid.bidder().and_then(|b| Identity::new(b).ok()) else {
        return CloseDecision::NoWinner;
    };
    let bought_at = bid.timestamp;

    if challenge.created_at > bought_at + Duration::seconds(STALENESS_TOLERANCE_SECS) {
        return CloseDecision::Stale {
            bought_by,
            bought_at,
        };
    }

    if !bought_by
        .as_str()
        .eq_ignore_ascii_case(challenge.minecraft_uuid.as_str())
    {
        return CloseDecision::WrongBuyer {
            bought_by,
            bought_at,
        };
    }

    CloseDecision::Complete {
        bought_by: challenge.minecraft_uuid.clone(),
        bought_at,
    }
}

/// Start of the rolling window used for aggregate completion.
pub fn aggregate_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(AGGREGATE_WINDOW_HOURS)
}

pub fn aggregate_satisfied(completed_in_window: i64) -> bool {
    completed_in_window >= AGGREGATE_THRESHOLD
}
