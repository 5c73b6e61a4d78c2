//! One-time verification codes derived from a keyed, time-bucketed hash.

use crate::domain::LinkId;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};
use std::fmt;
use std::sync::Arc;

/// Smallest code ever produced.
pub const CODE_OFFSET: i32 = 19;
/// Number of distinct codes; the largest code is `CODE_OFFSET + CODE_RANGE - 1`.
pub const CODE_RANGE: u32 = 980;
/// Codes are stable within buckets of this length.
pub const BUCKET_SECS: i64 = 600;

/// Computes the amount a user has to trade in-game to prove control of an identity.
///
/// `code = |i32_le(sha512(lower(identity) ++ link_id ++ bucket ++ secret)[0..4])| % 980 + 19`
/// where `bucket` is the timestamp floored to 10 minutes, formatted `YYYY-MM-DDTHH:MM:SSZ`.
#[derive(Clone)]
pub struct CodeGenerator {
    secret: Arc<str>,
}

impl CodeGenerator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Arc::from(secret.into()),
        }
    }

    pub fn code(&self, identity: &str, link_id: LinkId, at: DateTime<Utc>) -> i32 {
        let bucket = bucket_start(at).format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let mut hasher = Sha512::new();
        hasher.update(identity.to_lowercase().as_bytes());
        hasher.update(link_id.as_i64().to_string().as_bytes());
        hasher.update(bucket.as_bytes());
        hasher.update(self.secret.as_bytes());
        let digest = hasher.finalize();

        let head = i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (head.unsigned_abs() % CODE_RANGE) as i32 + CODE_OFFSET
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Floor a timestamp to the start of its 10-minute bucket.
pub fn bucket_start(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    let floored = secs - secs.rem_euclid(BUCKET_SECS);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(at)
}
