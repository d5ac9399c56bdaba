//! Admission gate and supervisor for polling tasks.
//!
//! Pulls hashes off the work queue and spawns one polling task per hash,
//! never more than `capacity` at once. While the gate is full the queue is
//! left alone; the next hash is only taken once a slot frees up. Finished
//! tasks are respawned according to [`RestartPolicy`]. A respawn keeps its
//! slot while it waits out its delay.

use super::{poll_match, EngineContext, PollOutcome};
use crate::store::{MatchSet, MatchStore};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskExit {
    Finished(PollOutcome),
    /// `claim_held`: the hash may still be inflight for this supervisor.
    Failed { reason: String, claim_held: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restart {
    Stop,
    After(Duration),
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RestartPolicy {
    /// Retired tasks get one immediate respawn, which finds the hash in
    /// `completed` and stops. Failures back off exponentially with
    /// `consecutive_failures` (1 for the first failure).
    pub fn decide(&self, exit: &TaskExit, consecutive_failures: u32) -> Restart {
        match exit {
            TaskExit::Finished(PollOutcome::Retired { .. }) => Restart::After(Duration::ZERO),
            TaskExit::Finished(PollOutcome::ClaimRejected | PollOutcome::Abandoned) => Restart::Stop,
            TaskExit::Failed { .. } => Restart::After(self.backoff(consecutive_failures)),
        }
    }

    fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

#[derive(Debug, Default)]
struct Supervised {
    restarts: u32,
    consecutive_failures: u32,
    /// Last attempt failed without handing its claim back.
    claim_held: bool,
}

pub struct AdmissionController {
    ctx: EngineContext,
    capacity: usize,
    restart: RestartPolicy,
    queue: mpsc::UnboundedReceiver<String>,
    tasks: JoinSet<(String, TaskExit)>,
    supervised: HashMap<String, Supervised>,
}

impl AdmissionController {
    pub fn new(
        ctx: EngineContext,
        capacity: usize,
        restart: RestartPolicy,
        queue: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            ctx,
            capacity: capacity.max(1),
            restart,
            queue,
            tasks: JoinSet::new(),
            supervised: HashMap::new(),
        }
    }

    /// Run until the queue is closed and every task has stopped.
    pub async fn run(mut self) {
        info!(capacity = self.capacity, "admission controller started");
        let mut queue_open = true;

        loop {
            if self.tasks.len() >= self.capacity {
                if let Some(done) = self.tasks.join_next().await {
                    self.on_exit(done);
                }
                continue;
            }

            tokio::select! {
                done = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Some(done) = done {
                        self.on_exit(done);
                    }
                }
                next = self.queue.recv(), if queue_open => match next {
                    Some(hash) => self.admit(hash),
                    None => {
                        debug!("work queue closed");
                        queue_open = false;
                    }
                },
                else => break,
            }
        }

        info!("admission controller stopped");
    }

    fn admit(&mut self, hash: String) {
        if self.supervised.contains_key(&hash) {
            debug!(hash = %hash, "already supervised");
            return;
        }
        self.supervised.insert(hash.clone(), Supervised::default());
        self.spawn(hash, Duration::ZERO, false);
    }

    fn spawn(&mut self, hash: String, delay: Duration, adopt: bool) {
        let ctx = self.ctx.clone();
        ctx.stats.task_started();
        self.tasks.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let exit = match AssertUnwindSafe(poll_match(&ctx, &hash, adopt)).catch_unwind().await {
                Ok(Ok(outcome)) => TaskExit::Finished(outcome),
                Ok(Err(e)) => TaskExit::Failed {
                    reason: e.to_string(),
                    claim_held: e.claim_held,
                },
                // Unknown how far it got; assume the claim is still ours.
                Err(_) => TaskExit::Failed {
                    reason: "polling task panicked".to_string(),
                    claim_held: true,
                },
            };
            ctx.stats.task_finished();
            (hash, exit)
        });
    }

    fn on_exit(&mut self, done: Result<(String, TaskExit), JoinError>) {
        let (hash, exit) = match done {
            Ok(done) => done,
            Err(e) => {
                // Only reachable on runtime shutdown; panics are caught in the task.
                error!(error = %e, "polling task lost");
                return;
            }
        };

        let Some(entry) = self.supervised.get_mut(&hash) else {
            return;
        };
        match &exit {
            TaskExit::Failed { reason, claim_held } => {
                entry.consecutive_failures += 1;
                entry.claim_held = *claim_held;
                self.ctx.stats.record_failure();
                warn!(
                    hash = %hash,
                    reason = %reason,
                    failures = entry.consecutive_failures,
                    claim_held = *claim_held,
                    "polling task failed"
                );
            }
            TaskExit::Finished(outcome) => {
                entry.consecutive_failures = 0;
                entry.claim_held = false;
                debug!(hash = %hash, outcome = ?outcome, "polling task finished");
            }
        }

        match self.restart.decide(&exit, entry.consecutive_failures) {
            Restart::Stop => {
                self.supervised.remove(&hash);
            }
            Restart::After(delay) => {
                entry.restarts += 1;
                let adopt = entry.claim_held;
                debug!(
                    hash = %hash,
                    restarts = entry.restarts,
                    delay_ms = delay.as_millis() as u64,
                    adopt,
                    "respawning"
                );
                self.ctx.stats.record_restart();
                self.spawn(hash, delay, adopt);
            }
        }
    }
}

/// Enqueue every `monitoring` hash now and then every `every`. Picks up
/// matches seeded by a producer running in another process, and matches
/// whose claim was handed back.
pub fn spawn_monitoring_sweep(
    store: Arc<dyn MatchStore>,
    queue: mpsc::UnboundedSender<String>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match store.members(MatchSet::Monitoring).await {
                Ok(hashes) => {
                    let count = hashes.len();
                    for hash in hashes {
                        if queue.send(hash).is_err() {
                            debug!("work queue closed, stopping sweep");
                            return;
                        }
                    }
                    debug!(count, set = %MatchSet::Monitoring, "sweep enqueued");
                }
                Err(e) => warn!(set = %MatchSet::Monitoring, error = %e, "sweep failed"),
            }
        }
    })
}
