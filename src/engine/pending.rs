//! Pending verifications awaiting a matching trade.

use crate::domain::{Identity, Link, LinkId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub identity: Identity,
    pub link_id: LinkId,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_requested_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn is_expired(&self, now: DateTime<Utc>, validity_window: Duration) -> bool {
        self.last_requested_at < now - validity_window
    }
}

impl From<&Link> for PendingEntry {
    fn from(link: &Link) -> Self {
        Self {
            identity: link.identity.clone(),
            link_id: link.id,
            verified: link.verified,
            created_at: link.created_at,
            updated_at: link.updated_at,
            last_requested_at: link.last_requested_at,
        }
    }
}

/// Concurrent map from identity to its pending entry.
///
/// Every operation is atomic per key; sweeps lock one shard at a time.
#[derive(Debug, Default)]
pub struct PendingStore {
    entries: DashMap<String, PendingEntry>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for its identity, returning the previous one.
    pub fn upsert(&self, entry: PendingEntry) -> Option<PendingEntry> {
        self.entries
            .insert(entry.identity.as_str().to_string(), entry)
    }

    pub fn get(&self, identity: &str) -> Option<PendingEntry> {
        self.entries.get(identity).map(|e| e.value().clone())
    }

    pub fn remove(&self, identity: &str) -> Option<PendingEntry> {
        self.entries.remove(identity).map(|(_, e)| e)
    }

    /// Flag the entry verified if it still refers to `link_id`.
    pub fn mark_verified(&self, identity: &str, link_id: LinkId, now: DateTime<Utc>) -> bool {
        match self.entries.get_mut(identity) {
            Some(mut entry) if entry.link_id == link_id => {
                entry.verified = true;
                entry.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Remove the entry only if it still refers to `link_id`.
    pub fn remove_link(&self, identity: &str, link_id: LinkId) -> bool {
        self.entries
            .remove_if(identity, |_, e| e.link_id == link_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry whose last request is older than `validity_window`.
    ///
    /// An entry refreshed between the scan and the removal is kept.
    pub fn sweep(&self, now: DateTime<Utc>, validity_window: Duration) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now, validity_window))
            .map(|e| e.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(key.as_str(), |_, e| e.is_expired(now, validity_window))
                    .is_some()
            })
            .count()
    }
}
