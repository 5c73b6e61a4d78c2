//! Domain types for account linking.
//!
//! This module provides:
//! - Primitives: Identity, UserId, LinkId
//! - Persisted users, links and challenges
//! - Inbound auction records and the outbound verification event

pub mod auction;
pub mod challenge;
pub mod link;
pub mod primitives;
pub mod verification;

pub use auction::{Auction, Bid};
pub use challenge::{Challenge, NewChallenge};
pub use link::{ConnectionRequest, Link, User};
pub use primitives::{Identity, LinkId, PrimitiveParseError, UserId};
pub use verification::VerificationEvent;
