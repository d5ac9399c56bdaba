//! Valkey (Redis-compatible) implementation of the coordination store.
//!
//! The engine side shares one multiplexed async connection across every
//! polling task; the producer owns a plain synchronous connection on its
//! own thread.

use super::{Keys, MatchProgress, MatchSet, MatchStore, SeedStore, StoreError};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Commands, ConnectionInfo};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

fn parse_timestamp(key: &str, raw: Option<String>) -> Result<Option<i64>, StoreError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                value,
            }),
    }
}

/// Async store used by polling tasks.
#[derive(Clone)]
pub struct ValkeyMatchStore {
    conn: MultiplexedConnection,
    keys: Keys,
}

impl ValkeyMatchStore {
    /// Connect to Valkey/Redis.
    pub async fn connect(info: ConnectionInfo, prefix: &str) -> Result<Self, StoreError> {
        let addr = info.addr.to_string();
        let client = Client::open(info)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(addr = %addr, prefix = prefix, "connected to Valkey");
        Ok(Self {
            conn,
            keys: Keys::new(prefix),
        })
    }

    /// Test connectivity.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }
}

#[async_trait]
impl MatchStore for ValkeyMatchStore {
    async fn claim(&self, hash: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let moved: bool = conn
            .smove(
                self.keys.set(MatchSet::Monitoring),
                self.keys.set(MatchSet::Inflight),
                hash,
            )
            .await?;
        Ok(moved)
    }

    async fn release(&self, hash: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let moved: bool = conn
            .smove(
                self.keys.set(MatchSet::Inflight),
                self.keys.set(MatchSet::Monitoring),
                hash,
            )
            .await?;
        Ok(moved)
    }

    async fn read_progress(&self, hash: &str) -> Result<MatchProgress, StoreError> {
        let mut conn = self.conn.clone();
        let wanted: BTreeSet<String> = conn.smembers(self.keys.bookmakers(hash)).await?;
        let ts_key = self.keys.timestamp(hash);
        let raw_ts: Option<String> = conn.get(&ts_key).await?;
        let created_at = parse_timestamp(&ts_key, raw_ts)?;

        let mut found = BTreeSet::new();
        if !wanted.is_empty() {
            let mut pipe = redis::pipe();
            for bookmaker in &wanted {
                pipe.exists(self.keys.found(hash, bookmaker));
            }
            let flags: Vec<bool> = pipe.query_async(&mut conn).await?;
            found = wanted
                .iter()
                .zip(flags)
                .filter(|(_, present)| *present)
                .map(|(b, _)| b.clone())
                .collect();
        }

        Ok(MatchProgress {
            wanted,
            found,
            created_at,
        })
    }

    async fn mark_found(&self, hash: &str, bookmakers: &[String]) -> Result<(), StoreError> {
        if bookmakers.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for bookmaker in bookmakers {
            pipe.set(self.keys.found(hash, bookmaker), "1").ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn retire(&self, hash: &str, bookmakers: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .srem(self.keys.set(MatchSet::Inflight), hash)
            .ignore()
            .srem(self.keys.set(MatchSet::Monitoring), hash)
            .ignore()
            .sadd(self.keys.set(MatchSet::Completed), hash)
            .ignore()
            .del(self.keys.match_keys(hash, bookmakers))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn members(&self, set: MatchSet) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = conn.smembers(self.keys.set(set)).await?;
        Ok(members)
    }

    async fn reclaim_inflight(&self) -> Result<usize, StoreError> {
        let orphans = self.members(MatchSet::Inflight).await?;
        let mut moved = 0;
        for hash in &orphans {
            if self.release(hash).await? {
                moved += 1;
            }
        }
        Ok(moved)
    }
}

/// Blocking store used by the producer thread.
pub struct ValkeySeedStore {
    conn: redis::Connection,
    keys: Keys,
}

impl ValkeySeedStore {
    pub fn connect(info: ConnectionInfo, prefix: &str) -> Result<Self, StoreError> {
        let client = Client::open(info)?;
        let conn = client.get_connection()?;
        Ok(Self {
            conn,
            keys: Keys::new(prefix),
        })
    }
}

impl SeedStore for ValkeySeedStore {
    fn known_hashes(&mut self) -> Result<HashSet<String>, StoreError> {
        let mut known = HashSet::new();
        for set in MatchSet::ALL {
            let members: HashSet<String> = self.conn.smembers(self.keys.set(set))?;
            known.extend(members);
        }
        Ok(known)
    }

    fn seed(&mut self, fingerprint: &Fingerprint, created_at: i64) -> Result<(), StoreError> {
        let hash = fingerprint.hash();
        let bookmakers: Vec<&String> = fingerprint.bookmakers().iter().collect();
        redis::pipe()
            .atomic()
            .sadd(self.keys.bookmakers(hash), bookmakers)
            .ignore()
            .set(self.keys.timestamp(hash), created_at)
            .ignore()
            .sadd(self.keys.set(MatchSet::Monitoring), hash)
            .ignore()
            .query::<()>(&mut self.conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("k", None).unwrap(), None);
        assert_eq!(
            parse_timestamp("k", Some("1700000000".to_string())).unwrap(),
            Some(1_700_000_000)
        );
        let err = parse_timestamp("k", Some("soon".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
