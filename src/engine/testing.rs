//! Fakes shared by the engine tests.

use super::{EngineContext, PollSettings};
use crate::metrics::EngineStats;
use crate::notify::{Notifier, NotifyError};
use crate::odds::OddsSource;
use crate::retry::RetryPolicy;
use crate::scrape::FetchError;
use crate::store::memory::MemoryStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_millis(1),
        stale_after: Duration::from_secs(7 * 24 * 3600),
        fetch_policy: RetryPolicy::bounded(3, Duration::ZERO),
        release_policy: RetryPolicy::bounded(2, Duration::ZERO),
    }
}

pub fn context(
    store: &MemoryStore,
    odds: Arc<FakeOdds>,
    notifier: Arc<RecordingNotifier>,
) -> EngineContext {
    context_with(store, odds, notifier)
}

/// Like [`context`] with any odds source.
pub fn context_with(
    store: &MemoryStore,
    odds: Arc<dyn OddsSource>,
    notifier: Arc<RecordingNotifier>,
) -> EngineContext {
    EngineContext {
        store: Arc::new(store.clone()),
        odds,
        notifier,
        settings: settings(),
        stats: Arc::new(EngineStats::new()),
    }
}

/// Wraps an odds source and takes `store` down right after the first poll
/// answers. With `restore_after` the store comes back that much later;
/// otherwise it stays down until the test brings it back.
pub struct StoreOutage {
    inner: Arc<FakeOdds>,
    store: MemoryStore,
    restore_after: Option<Duration>,
    tripped: AtomicBool,
}

impl StoreOutage {
    pub fn new(inner: Arc<FakeOdds>, store: &MemoryStore, restore_after: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            store: store.clone(),
            restore_after,
            tripped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl OddsSource for StoreOutage {
    async fn live_bookmakers(&self, uri: &str) -> Result<Vec<String>, FetchError> {
        let page = self.inner.live_bookmakers(uri).await;
        if !self.tripped.swap(true, Ordering::SeqCst) {
            self.store.set_unavailable(true);
            if let Some(after) = self.restore_after {
                let store = self.store.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    store.set_unavailable(false);
                });
            }
        }
        page
    }
}

/// Odds source replaying a script of page results. `Err(status)` plays an
/// HTTP failure. Once the script runs out every poll returns `fallback`.
pub struct FakeOdds {
    script: Mutex<VecDeque<Result<Vec<String>, u16>>>,
    fallback: Vec<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeOdds {
    pub fn scripted(steps: Vec<Result<Vec<&str>, u16>>) -> Arc<Self> {
        let script = steps
            .into_iter()
            .map(|step| step.map(|names| names.into_iter().map(String::from).collect()))
            .collect();
        Arc::new(Self {
            script: Mutex::new(script),
            fallback: Vec::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    /// Always lists `names`, after sleeping `delay`.
    pub fn answering(names: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: names.iter().map(|s| s.to_string()).collect(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OddsSource for FakeOdds {
    async fn live_bookmakers(&self, uri: &str) -> Result<Vec<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let step = self.script.lock().pop_front();
        match step {
            Some(Ok(names)) => Ok(names),
            Some(Err(status)) => Err(FetchError::Status {
                url: uri.to_string(),
                status,
            }),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Records every alert; optionally fails every delivery.
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifyError::NoRecipients);
        }
        self.messages.lock().push(text.to_string());
        Ok(())
    }
}
