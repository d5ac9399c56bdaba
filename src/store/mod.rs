//! Coordination store protocol.
//!
//! Data model (all keys optionally namespaced as `{prefix}:{key}`):
//!   match.inmonitoring            → SET of hashes known but not being polled
//!   match.inflight                → SET of hashes claimed by a polling task
//!   match.endmonitoring           → SET of retired hashes
//!   {hash}:bookmakers             → SET of watched bookmaker names
//!   {hash}:bookmakers:{name}      → "1" once that bookmaker has been found
//!   {hash}:timestamp              → creation time, epoch seconds
//!
//! A hash is a member of at most one of the three sets. Moving between them
//! is done with `SMOVE` or inside `MULTI`, so readers never observe a hash
//! in two sets at once.

#[cfg(test)]
pub(crate) mod memory;
pub mod valkey;

use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

pub use self::valkey::{ValkeyMatchStore, ValkeySeedStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt value at {key}: {value:?}")]
    Corrupt { key: String, value: String },
}

/// The three lifecycle sets a match hash moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchSet {
    Monitoring,
    Inflight,
    Completed,
}

impl MatchSet {
    pub const ALL: [MatchSet; 3] = [MatchSet::Monitoring, MatchSet::Inflight, MatchSet::Completed];

    pub fn wire_name(&self) -> &'static str {
        match self {
            MatchSet::Monitoring => "match.inmonitoring",
            MatchSet::Inflight => "match.inflight",
            MatchSet::Completed => "match.endmonitoring",
        }
    }
}

impl std::fmt::Display for MatchSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchSet::Monitoring => write!(f, "monitoring"),
            MatchSet::Inflight => write!(f, "inflight"),
            MatchSet::Completed => write!(f, "completed"),
        }
    }
}

/// Key builder for one deployment namespace.
#[derive(Debug, Clone, Default)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    /// Build a namespaced key: "{prefix}:{suffix}", or just the suffix
    /// when no prefix is configured.
    fn key(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}:{}", self.prefix, suffix)
        }
    }

    pub fn set(&self, set: MatchSet) -> String {
        self.key(set.wire_name())
    }

    pub fn bookmakers(&self, hash: &str) -> String {
        self.key(&format!("{}:bookmakers", hash))
    }

    pub fn found(&self, hash: &str, bookmaker: &str) -> String {
        self.key(&format!("{}:bookmakers:{}", hash, bookmaker))
    }

    pub fn timestamp(&self, hash: &str) -> String {
        self.key(&format!("{}:timestamp", hash))
    }

    /// Every per-match key for `hash`, markers included.
    pub fn match_keys<'a, I>(&self, hash: &str, bookmakers: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut keys: Vec<String> = bookmakers
            .into_iter()
            .map(|b| self.found(hash, b))
            .collect();
        keys.push(self.bookmakers(hash));
        keys.push(self.timestamp(hash));
        keys
    }
}

/// Progress of one match as persisted in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchProgress {
    /// The full watch-list the match was seeded with.
    pub wanted: BTreeSet<String>,
    /// Members of `wanted` that already carry a found marker.
    pub found: BTreeSet<String>,
    pub created_at: Option<i64>,
}

impl MatchProgress {
    /// Bookmakers still to be confirmed.
    pub fn remaining(&self) -> BTreeSet<String> {
        self.wanted.difference(&self.found).cloned().collect()
    }
}

/// Store operations issued by polling tasks and the admission controller.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Move `hash` from monitoring to inflight. `false` when the hash is
    /// already claimed, retired, or unknown.
    async fn claim(&self, hash: &str) -> Result<bool, StoreError>;

    /// Move `hash` from inflight back to monitoring.
    async fn release(&self, hash: &str) -> Result<bool, StoreError>;

    async fn read_progress(&self, hash: &str) -> Result<MatchProgress, StoreError>;

    async fn mark_found(&self, hash: &str, bookmakers: &[String]) -> Result<(), StoreError>;

    /// Drop every per-match key and move `hash` into completed.
    async fn retire(&self, hash: &str, bookmakers: &BTreeSet<String>) -> Result<(), StoreError>;

    async fn members(&self, set: MatchSet) -> Result<HashSet<String>, StoreError>;

    /// Move every inflight hash back to monitoring. Returns how many moved.
    async fn reclaim_inflight(&self) -> Result<usize, StoreError>;
}

/// Store operations issued by the synchronous producer.
pub trait SeedStore {
    /// Hashes present in any of the three lifecycle sets.
    fn known_hashes(&mut self) -> Result<HashSet<String>, StoreError>;

    /// Write the watch-list and creation time, then add the hash to
    /// monitoring.
    fn seed(&mut self, fingerprint: &Fingerprint, created_at: i64) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_keys_without_prefix() {
        let keys = Keys::new("");
        assert_eq!(keys.set(MatchSet::Inflight), "match.inflight");
        assert_eq!(keys.set(MatchSet::Monitoring), "match.inmonitoring");
        assert_eq!(keys.set(MatchSet::Completed), "match.endmonitoring");
        assert_eq!(keys.bookmakers("h"), "h:bookmakers");
        assert_eq!(keys.found("h", "william hill"), "h:bookmakers:william hill");
        assert_eq!(keys.timestamp("h"), "h:timestamp");
    }

    #[test]
    fn test_wire_keys_with_prefix() {
        let keys = Keys::new("staging:");
        assert_eq!(keys.set(MatchSet::Inflight), "staging:match.inflight");
        assert_eq!(keys.timestamp("h"), "staging:h:timestamp");

        let wanted: BTreeSet<String> = ["bwin".to_string(), "pinnacle".to_string()].into();
        assert_eq!(
            keys.match_keys("h", &wanted),
            vec![
                "staging:h:bookmakers:bwin",
                "staging:h:bookmakers:pinnacle",
                "staging:h:bookmakers",
                "staging:h:timestamp",
            ]
        );
    }

    #[test]
    fn test_set_display_is_short_name() {
        assert_eq!(MatchSet::Monitoring.to_string(), "monitoring");
        assert_eq!(MatchSet::Completed.to_string(), "completed");
        assert_ne!(MatchSet::Inflight.to_string(), MatchSet::Inflight.wire_name());
    }

    #[test]
    fn test_remaining_excludes_found() {
        let progress = MatchProgress {
            wanted: ["pinnacle".to_string(), "bwin".to_string()].into(),
            found: ["bwin".to_string()].into(),
            created_at: Some(0),
        };
        let expected: BTreeSet<String> = ["pinnacle".to_string()].into();
        assert_eq!(progress.remaining(), expected);
    }
}
