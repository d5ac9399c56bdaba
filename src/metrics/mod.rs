//! Engine counters.
//!
//! Tracks:
//! - Active and peak polling tasks (admission gate health)
//! - Claims, discoveries and notifications
//! - Retirements by reason, task failures and restarts

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
pub struct EngineStats {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    claims: AtomicU64,
    claim_conflicts: AtomicU64,
    found: AtomicU64,
    notified: AtomicU64,
    notify_failures: AtomicU64,
    retired_found_all: AtomicU64,
    retired_stale: AtomicU64,
    task_failures: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub active: usize,
    pub peak_active: usize,
    pub claims: u64,
    pub claim_conflicts: u64,
    pub found: u64,
    pub notified: u64,
    pub notify_failures: u64,
    pub retired_found_all: u64,
    pub retired_stale: u64,
    pub task_failures: u64,
    pub restarts: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_started(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    pub fn task_finished(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_claim(&self, won: bool) {
        if won {
            self.claims.fetch_add(1, Ordering::Relaxed);
        } else {
            self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_found(&self, count: usize) {
        self.found.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notified.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notify_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retired(&self, stale: bool) {
        if stale {
            self.retired_stale.fetch_add(1, Ordering::Relaxed);
        } else {
            self.retired_found_all.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.task_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active.load(Ordering::SeqCst),
            peak_active: self.peak_active.load(Ordering::SeqCst),
            claims: self.claims.load(Ordering::Relaxed),
            claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
            retired_found_all: self.retired_found_all.load(Ordering::Relaxed),
            retired_stale: self.retired_stale.load(Ordering::Relaxed),
            task_failures: self.task_failures.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Log a stats snapshot every `every` until the process exits.
pub fn spawn_status_reporter(stats: Arc<EngineStats>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let s = stats.snapshot();
            info!(
                active = s.active,
                peak = s.peak_active,
                claims = s.claims,
                conflicts = s.claim_conflicts,
                found = s.found,
                notified = s.notified,
                notify_failures = s.notify_failures,
                found_all = s.retired_found_all,
                stale = s.retired_stale,
                failures = s.task_failures,
                restarts = s.restarts,
                "engine status"
            );
        }
    });
}
