//! Per-match polling.
//!
//! One polling task owns one match hash at a time:
//!
//!   Claiming → Seeded-check → Polling → (Found-all | Stale) → Retired
//!
//! Ownership is established by the store's claim (monitoring → inflight).
//! Found bookmakers are persisted before anyone is notified, so a task that
//! dies mid-way resumes from the markers without alerting twice.

pub mod admission;
#[cfg(test)]
pub(crate) mod testing;

use crate::fingerprint::{match_name, uri_from_hash};
use crate::metrics::EngineStats;
use crate::notify::Notifier;
use crate::odds::OddsSource;
use crate::retry::{retry_async, RetryPolicy};
use crate::scrape::FetchError;
use crate::store::{MatchStore, StoreError};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use admission::{spawn_monitoring_sweep, AdmissionController, Restart, RestartPolicy, TaskExit};

#[derive(Error, Debug)]
pub enum PollError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("odds fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// A failed polling task. `claim_held` is set when the hash may still sit in
/// `inflight` on this task's behalf, so the next attempt must adopt it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct TaskError {
    #[source]
    pub error: PollError,
    pub claim_held: bool,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Pause before every poll of one match.
    pub poll_interval: Duration,
    /// Age after which a match is retired unresolved.
    pub stale_after: Duration,
    /// Applied to every odds fetch.
    pub fetch_policy: RetryPolicy,
    /// Applied when handing a claim back after a failure.
    pub release_policy: RetryPolicy,
}

/// Everything a polling task needs. Built once at startup and cloned into
/// every task.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn MatchStore>,
    pub odds: Arc<dyn OddsSource>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: PollSettings,
    pub stats: Arc<EngineStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    FoundAll,
    Stale,
}

impl std::fmt::Display for RetireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetireReason::FoundAll => write!(f, "found_all"),
            RetireReason::Stale => write!(f, "stale"),
        }
    }
}

/// How a polling task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Another owner holds the hash, or it is already retired.
    ClaimRejected,
    /// No seed data behind the claim; the claim was handed back.
    Abandoned,
    /// The match was retired; `bookmakers` is the full original watch-list.
    Retired {
        reason: RetireReason,
        bookmakers: BTreeSet<String>,
        hash: String,
    },
}

/// True once a match created at `created_at` (epoch seconds) is older than
/// `stale_after` at `now`.
pub fn is_stale(created_at: i64, now: i64, stale_after: Duration) -> bool {
    now.saturating_sub(created_at) > stale_after.as_secs() as i64
}

/// Members of `remaining` present in `live`, in page order, without repeats.
pub fn newly_found(live: &[String], remaining: &BTreeSet<String>) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for name in live {
        if remaining.contains(name) && !found.contains(name) {
            found.push(name.clone());
        }
    }
    found
}

/// Run one polling task for `hash` to completion.
///
/// With `adopt` set the task already owns an inflight claim left behind by a
/// failed predecessor and proceeds even though its own claim conflicts.
pub async fn poll_match(ctx: &EngineContext, hash: &str, adopt: bool) -> Result<PollOutcome, TaskError> {
    let uri = match uri_from_hash(hash) {
        Ok(uri) => uri,
        Err(e) => {
            warn!(hash = hash, error = %e, "undecodable match hash, skipping");
            return Ok(PollOutcome::Abandoned);
        }
    };

    let won = ctx.store.claim(hash).await.map_err(|e| TaskError {
        error: e.into(),
        claim_held: adopt,
    })?;
    if !won && !adopt {
        ctx.stats.record_claim(false);
        debug!(hash = hash, "claim rejected");
        return Ok(PollOutcome::ClaimRejected);
    }
    ctx.stats.record_claim(true);
    if !won {
        info!(hash = hash, "adopting inflight claim");
    }

    match track_claimed(ctx, hash, &uri).await {
        Ok(outcome) => Ok(outcome),
        Err(error) => {
            let released = release_after_failure(ctx, hash).await;
            Err(TaskError {
                error,
                claim_held: !released,
            })
        }
    }
}

async fn track_claimed(ctx: &EngineContext, hash: &str, uri: &str) -> Result<PollOutcome, PollError> {
    let progress = ctx.store.read_progress(hash).await?;
    let created_at = match progress.created_at {
        Some(ts) if !progress.wanted.is_empty() => ts,
        _ => {
            warn!(hash = hash, "claimed match has no seed data, releasing");
            ctx.store.release(hash).await?;
            return Ok(PollOutcome::Abandoned);
        }
    };

    let name = match_name(uri);
    let mut remaining = progress.remaining();
    info!(
        match_name = %name,
        wanted = ?remaining,
        already_found = progress.found.len(),
        "tracking match"
    );

    let odds = ctx.odds.as_ref();
    let reason = loop {
        if remaining.is_empty() {
            break RetireReason::FoundAll;
        }

        tokio::time::sleep(ctx.settings.poll_interval).await;

        if is_stale(created_at, chrono::Utc::now().timestamp(), ctx.settings.stale_after) {
            info!(match_name = %name, remaining = ?remaining, "match went stale");
            break RetireReason::Stale;
        }

        let live = retry_async(&ctx.settings.fetch_policy, "live bookmakers", move || {
            odds.live_bookmakers(uri)
        })
        .await?;

        let found = newly_found(&live, &remaining);
        if found.is_empty() {
            continue;
        }

        ctx.store.mark_found(hash, &found).await?;
        ctx.stats.record_found(found.len());

        for bookmaker in &found {
            remaining.remove(bookmaker);
            info!(match_name = %name, bookmaker = %bookmaker, "bookmaker found");
            let text = format!("{} | found: {}", name, bookmaker);
            match ctx.notifier.notify(&text).await {
                Ok(()) => ctx.stats.record_notification(true),
                Err(e) => {
                    warn!(match_name = %name, bookmaker = %bookmaker, error = %e, "notification failed");
                    ctx.stats.record_notification(false);
                }
            }
            tokio::task::yield_now().await;
        }
    };

    ctx.store.retire(hash, &progress.wanted).await?;
    ctx.stats.record_retired(reason == RetireReason::Stale);
    info!(match_name = %name, reason = %reason, "match retired");

    Ok(PollOutcome::Retired {
        reason,
        bookmakers: progress.wanted,
        hash: hash.to_string(),
    })
}

/// True once the claim is no longer held: moved back to monitoring, or the
/// hash was not inflight to begin with.
async fn release_after_failure(ctx: &EngineContext, hash: &str) -> bool {
    let store = ctx.store.as_ref();
    let released = retry_async(&ctx.settings.release_policy, "release claim", move || {
        store.release(hash)
    })
    .await;
    match released {
        Ok(_) => true,
        Err(e) => {
            warn!(hash = hash, error = %e, "could not release claim, next attempt adopts it");
            false
        }
    }
}
