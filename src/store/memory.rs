//! In-process store with the same semantics as the Valkey one. Used by unit
//! tests across the crate.

use super::{MatchProgress, MatchSet, MatchStore, SeedStore, StoreError};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{ErrorKind, RedisError};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub sets: BTreeMap<MatchSet, BTreeSet<String>>,
    pub bookmakers: BTreeMap<String, BTreeSet<String>>,
    pub found: BTreeSet<(String, String)>,
    pub timestamps: BTreeMap<String, i64>,
}

impl MemoryState {
    fn set_mut(&mut self, set: MatchSet) -> &mut BTreeSet<String> {
        self.sets.entry(set).or_default()
    }

    fn smove(&mut self, from: MatchSet, to: MatchSet, hash: &str) -> bool {
        if self.set_mut(from).remove(hash) {
            self.set_mut(to).insert(hash.to_string());
            true
        } else {
            false
        }
    }

    /// Sets `hash` currently belongs to.
    pub fn sets_of(&self, hash: &str) -> Vec<MatchSet> {
        MatchSet::ALL
            .into_iter()
            .filter(|s| self.sets.get(s).map_or(false, |m| m.contains(hash)))
            .collect()
    }

    /// True if any per-match key for `hash` remains.
    pub fn has_match_keys(&self, hash: &str) -> bool {
        self.bookmakers.contains_key(hash)
            || self.timestamps.contains_key(hash)
            || self.found.iter().any(|(h, _)| h == hash)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
    /// Store calls made since creation, failed ones included.
    calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every following call fail like a dropped connection.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Seed a match with an explicit creation time.
    pub fn seed_at(&self, hash: &str, bookmakers: &[&str], created_at: i64) {
        let mut state = self.state.lock();
        state.bookmakers.insert(
            hash.to_string(),
            bookmakers.iter().map(|b| b.to_string()).collect(),
        );
        state.timestamps.insert(hash.to_string(), created_at);
        state.set_mut(MatchSet::Monitoring).insert(hash.to_string());
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Redis(RedisError::from((
                ErrorKind::IoError,
                "store unavailable",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn claim(&self, hash: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .smove(MatchSet::Monitoring, MatchSet::Inflight, hash))
    }

    async fn release(&self, hash: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .smove(MatchSet::Inflight, MatchSet::Monitoring, hash))
    }

    async fn read_progress(&self, hash: &str) -> Result<MatchProgress, StoreError> {
        self.check()?;
        let state = self.state.lock();
        let wanted = state.bookmakers.get(hash).cloned().unwrap_or_default();
        let found = wanted
            .iter()
            .filter(|b| state.found.contains(&(hash.to_string(), b.to_string())))
            .cloned()
            .collect();
        Ok(MatchProgress {
            wanted,
            found,
            created_at: state.timestamps.get(hash).copied(),
        })
    }

    async fn mark_found(&self, hash: &str, bookmakers: &[String]) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        for bookmaker in bookmakers {
            state.found.insert((hash.to_string(), bookmaker.clone()));
        }
        Ok(())
    }

    async fn retire(&self, hash: &str, bookmakers: &BTreeSet<String>) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        state.set_mut(MatchSet::Inflight).remove(hash);
        state.set_mut(MatchSet::Monitoring).remove(hash);
        state.set_mut(MatchSet::Completed).insert(hash.to_string());
        state.bookmakers.remove(hash);
        state.timestamps.remove(hash);
        // Same key set as the Valkey store: only markers of the given names.
        state
            .found
            .retain(|(h, b)| h != hash || !bookmakers.contains(b));
        Ok(())
    }

    async fn members(&self, set: MatchSet) -> Result<HashSet<String>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .sets
            .get(&set)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn reclaim_inflight(&self) -> Result<usize, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let orphans: Vec<String> = state.set_mut(MatchSet::Inflight).iter().cloned().collect();
        for hash in &orphans {
            state.smove(MatchSet::Inflight, MatchSet::Monitoring, hash);
        }
        Ok(orphans.len())
    }
}

impl SeedStore for MemoryStore {
    fn known_hashes(&mut self) -> Result<HashSet<String>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.sets.values().flatten().cloned().collect())
    }

    fn seed(&mut self, fingerprint: &Fingerprint, created_at: i64) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let hash = fingerprint.hash().to_string();
        state
            .bookmakers
            .insert(hash.clone(), fingerprint.bookmakers().clone());
        state.timestamps.insert(hash.clone(), created_at);
        state.set_mut(MatchSet::Monitoring).insert(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        store.seed_at("h", &["bwin"], 0);

        let (a, b) = tokio::join!(store.claim("h"), store.claim("h"));
        let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
        assert_eq!(wins, 1);
        assert_eq!(store.snapshot().sets_of("h"), vec![MatchSet::Inflight]);
    }

    #[tokio::test]
    async fn test_claim_on_unknown_or_completed_hash_is_a_conflict() {
        let store = MemoryStore::new();
        assert!(!store.claim("ghost").await.unwrap());

        store.seed_at("h", &["bwin"], 0);
        let wanted = store.read_progress("h").await.unwrap().wanted;
        store.retire("h", &wanted).await.unwrap();
        let before = store.snapshot();
        assert!(!store.claim("h").await.unwrap());
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_progress_survives_restart() {
        let store = MemoryStore::new();
        store.seed_at("h", &["pinnacle", "bwin"], 0);
        store.mark_found("h", &["bwin".to_string()]).await.unwrap();

        let progress = store.read_progress("h").await.unwrap();
        let expected: BTreeSet<String> = ["pinnacle".to_string()].into();
        assert_eq!(progress.remaining(), expected);
    }

    #[tokio::test]
    async fn test_retire_deletes_match_keys() {
        let store = MemoryStore::new();
        store.seed_at("h", &["pinnacle", "bwin"], 0);
        assert!(store.claim("h").await.unwrap());
        store.mark_found("h", &["bwin".to_string()]).await.unwrap();

        let wanted = store.read_progress("h").await.unwrap().wanted;
        store.retire("h", &wanted).await.unwrap();

        let state = store.snapshot();
        assert!(!state.has_match_keys("h"));
        assert_eq!(state.sets_of("h"), vec![MatchSet::Completed]);
    }

    #[tokio::test]
    async fn test_retire_only_drops_markers_it_is_given() {
        let store = MemoryStore::new();
        store.seed_at("h", &["pinnacle", "bwin"], 0);
        store
            .mark_found("h", &["bwin".to_string(), "pinnacle".to_string()])
            .await
            .unwrap();

        let only_pinnacle: BTreeSet<String> = ["pinnacle".to_string()].into();
        store.retire("h", &only_pinnacle).await.unwrap();

        let state = store.snapshot();
        assert!(state.has_match_keys("h"));
        assert!(state.found.contains(&("h".to_string(), "bwin".to_string())));
        assert!(!state.found.contains(&("h".to_string(), "pinnacle".to_string())));
    }
}
