//! Auction records delivered on the sale, bid and sold-auction streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An auction as published by the auction ingestion pipeline.
///
/// The same record shape is used for newly created auctions (sales),
/// auctions that received bids and auctions that closed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Auction {
    /// Lot identifier.
    pub uuid: String,
    /// Seller identity; records without one are skipped.
    pub auctioneer_id: Option<String>,
    pub starting_bid: i64,
    pub highest_bid_amount: i64,
    pub end: Option<DateTime<Utc>>,
    pub bids: Vec<Bid>,
    /// Numeric sequence id, used for progress logging only.
    pub u_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    #[serde(default)]
    pub bidder: Option<String>,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

impl Auction {
    /// Seller identity, ignoring blank values.
    pub fn seller(&self) -> Option<&str> {
        self.auctioneer_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The winning bid: highest amount, earliest timestamp on ties.
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.bids.iter().max_by(|a, b| {
            a.amount
                .cmp(&b.amount)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        })
    }
}

impl Bid {
    pub fn bidder(&self) -> Option<&str> {
        self.bidder
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bid(bidder: &str, amount: i64, secs: i64) -> Bid {
        Bid {
            bidder: Some(bidder.to_string()),
            amount,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_deserialize_camel_case_with_missing_fields() {
        let json = r#"{"uuid":"lot1","auctioneerId":"abc","startingBid":512,"uId":9}"#;
        let auction: Auction = serde_json::from_str(json).unwrap();
        assert_eq!(auction.uuid, "lot1");
        assert_eq!(auction.seller(), Some("abc"));
        assert_eq!(auction.starting_bid, 512);
        assert_eq!(auction.u_id, 9);
        assert!(auction.bids.is_empty());
        assert!(auction.end.is_none());
    }

    #[test]
    fn test_blank_seller_is_none() {
        let auction = Auction {
            auctioneer_id: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(auction.seller(), None);
    }

    #[test]
    fn test_highest_bid_prefers_amount_then_earliest() {
        let auction = Auction {
            bids: vec![bid("a", 100, 10), bid("b", 300, 30), bid("c", 300, 20)],
            ..Default::default()
        };
        let best = auction.highest_bid().unwrap();
        assert_eq!(best.bidder(), Some("c"));
    }

    #[test]
    fn test_highest_bid_empty() {
        assert!(Auction::default().highest_bid().is_none());
    }
}
