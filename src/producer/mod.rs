//! Producer: turns the match source into seeded matches.
//!
//! Runs synchronously on its own OS thread. Each cycle reads the source,
//! fingerprints every entry, drops hashes the store already knows about and
//! seeds the rest into `monitoring`. Seeded hashes are also pushed to the
//! engine's work queue when both run in one process.

use crate::fingerprint::{match_name, Fingerprint};
use crate::retry::{retry_blocking, RetryPolicy};
use crate::scrape::FetchError;
use crate::source::{parse_descriptor, MatchSource};
use crate::store::{SeedStore, StoreError};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("match source failed: {0}")]
    Source(#[from] FetchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct ProducerSettings {
    pub default_bookmakers: Vec<String>,
    /// Applied to every source fetch.
    pub fetch_policy: RetryPolicy,
    /// Pause between two cycles.
    pub poll_interval: Duration,
    /// Pause after a failed cycle.
    pub restart_delay: Duration,
}

pub struct Producer<S, M> {
    store: S,
    source: M,
    settings: ProducerSettings,
    queue: Option<UnboundedSender<String>>,
}

impl<S: SeedStore, M: MatchSource> Producer<S, M> {
    pub fn new(
        store: S,
        source: M,
        settings: ProducerSettings,
        queue: Option<UnboundedSender<String>>,
    ) -> Self {
        Self {
            store,
            source,
            settings,
            queue,
        }
    }

    /// One pass over the source. Returns how many matches were seeded.
    pub fn run_cycle(&mut self) -> Result<usize, ProducerError> {
        let source = &self.source;
        let lines = retry_blocking(&self.settings.fetch_policy, "match source", || {
            source.fetch_descriptors()
        })?;

        let mut seen = HashSet::new();
        let mut candidates: Vec<Fingerprint> = Vec::new();
        for line in &lines {
            match parse_descriptor(line, &self.settings.default_bookmakers) {
                None => {}
                Some(Err(e)) => warn!(line = %line, error = %e, "skipping match entry"),
                Some(Ok(fp)) => {
                    if seen.insert(fp.hash().to_string()) {
                        candidates.push(fp);
                    }
                }
            }
        }
        if candidates.is_empty() {
            debug!("match source is empty");
            return Ok(0);
        }

        let known = self.store.known_hashes()?;
        let created_at = chrono::Utc::now().timestamp();
        let mut seeded = 0;

        for fp in candidates {
            if known.contains(fp.hash()) {
                continue;
            }
            self.store.seed(&fp, created_at)?;
            seeded += 1;
            info!(
                hash = %fp.hash(),
                match_name = %match_name(fp.uri()),
                bookmakers = ?fp.bookmakers(),
                "match seeded"
            );
            self.enqueue(fp.hash());
        }

        Ok(seeded)
    }

    fn enqueue(&mut self, hash: &str) {
        let Some(queue) = &self.queue else {
            return;
        };
        if queue.send(hash.to_string()).is_err() {
            warn!("engine queue closed, seeding into the store only");
            self.queue = None;
        }
    }

    /// Cycle forever. A failed cycle is retried after `restart_delay`.
    pub fn run(mut self) {
        let outer = RetryPolicy::unbounded(self.settings.restart_delay);
        let poll_interval = self.settings.poll_interval;
        info!(poll_interval_secs = poll_interval.as_secs(), "producer started");
        loop {
            if let Ok(seeded) = retry_blocking(&outer, "producer cycle", || self.run_cycle()) {
                debug!(seeded, "producer cycle done");
            }
            std::thread::sleep(poll_interval);
        }
    }
}
