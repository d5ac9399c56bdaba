//! betwatch: watches matches for bookmaker odds and alerts when they appear.
//!
//! Usage:
//!   betwatch            # producer and engine in one process
//!   betwatch producer   # only seed matches from the source
//!   betwatch engine     # only poll matches found in the store

use anyhow::{anyhow, bail, Context};
use betwatch::config::Config;
use betwatch::engine::{spawn_monitoring_sweep, AdmissionController, EngineContext, PollSettings, RestartPolicy};
use betwatch::metrics::{spawn_status_reporter, EngineStats};
use betwatch::notify::{LogNotifier, Notifier, TelegramNotifier};
use betwatch::odds::BetExplorerClient;
use betwatch::producer::{Producer, ProducerSettings};
use betwatch::retry::RetryPolicy;
use betwatch::scrape;
use betwatch::source::NoteSource;
use betwatch::store::{MatchStore, ValkeyMatchStore, ValkeySeedStore};
use redis::ConnectionInfo;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "betwatch.toml";
const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    All,
    Producer,
    Engine,
}

impl Role {
    fn runs_producer(self) -> bool {
        matches!(self, Role::All | Role::Producer)
    }

    fn runs_engine(self) -> bool {
        matches!(self, Role::All | Role::Engine)
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Role::All),
            "producer" => Ok(Role::Producer),
            "engine" => Ok(Role::Engine),
            other => bail!("unknown process '{}', expected all|producer|engine", other),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let role = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Role>()?,
        None => Role::All,
    };

    let config_path = std::env::var("BETWATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let from_file = Path::new(&config_path).exists();
    let config = if from_file {
        Config::load(Path::new(&config_path))?
    } else {
        Config::from_env()?
    };
    config.validate()?;

    init_logging(&config);
    info!("betwatch v{} starting ({:?})", env!("CARGO_PKG_VERSION"), role);
    if !from_file {
        info!(path = %config_path, "no config file found, using env-only config");
    }

    let conn_info = config.redis.connection_info()?;
    let (tx, rx) = mpsc::unbounded_channel();

    // --- Producer thread ---
    let producer_done = if role.runs_producer() {
        if config.source.url.is_empty() {
            bail!("source.url is not set (MATCH_SOURCE_URL)");
        }
        let queue = role.runs_engine().then(|| tx.clone());
        Some(spawn_producer(&config, conn_info.clone(), queue)?)
    } else {
        None
    };

    // --- Engine ---
    let controller = if role.runs_engine() {
        Some(start_engine(&config, conn_info, tx, rx).await?)
    } else {
        drop(tx);
        None
    };

    let producer_exit = async move {
        match producer_done {
            Some(done) => done
                .await
                .unwrap_or_else(|_| anyhow!("producer thread exited")),
            None => std::future::pending().await,
        }
    };
    let engine_run = async move {
        match controller {
            Some(controller) => controller.run().await,
            None => std::future::pending().await,
        }
    };

    info!("running - press Ctrl+C to stop");
    tokio::select! {
        err = producer_exit => return Err(err.context("producer stopped")),
        _ = engine_run => warn!("admission controller exited"),
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutting down...");
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }
}

/// Start the producer on its own OS thread. The receiver resolves only if
/// the producer could not start (or its thread died).
fn spawn_producer(
    config: &Config,
    info: ConnectionInfo,
    queue: Option<mpsc::UnboundedSender<String>>,
) -> anyhow::Result<oneshot::Receiver<anyhow::Error>> {
    let (done_tx, done_rx) = oneshot::channel();
    let source = config.source.clone();
    let prefix = config.redis.prefix.clone();

    std::thread::Builder::new()
        .name("producer".into())
        .spawn(move || {
            // Blocking clients must be built off the async runtime.
            let started = ValkeySeedStore::connect(info, &prefix)
                .context("producer store")
                .and_then(|store| {
                    let note = NoteSource::new(source.url.clone(), SOURCE_TIMEOUT)
                        .context("match source client")?;
                    Ok((store, note))
                });
            let err = match started {
                Ok((store, note)) => {
                    let settings = ProducerSettings {
                        default_bookmakers: source.default_bookmakers.clone(),
                        fetch_policy: RetryPolicy::bounded(
                            source.fetch_attempts,
                            Duration::from_millis(source.fetch_retry_delay_ms),
                        ),
                        poll_interval: Duration::from_secs(source.poll_interval_secs),
                        restart_delay: Duration::from_secs(source.restart_delay_secs),
                    };
                    Producer::new(store, note, settings, queue).run();
                    anyhow!("producer loop returned")
                }
                Err(e) => e,
            };
            let _ = done_tx.send(err);
        })?;

    Ok(done_rx)
}

async fn start_engine(
    config: &Config,
    info: ConnectionInfo,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
) -> anyhow::Result<AdmissionController> {
    // --- Valkey ---
    let store = ValkeyMatchStore::connect(info, &config.redis.prefix).await?;
    store.ping().await.context("valkey ping")?;

    if config.engine.reclaim_inflight_on_start {
        let reclaimed = store.reclaim_inflight().await?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "moved orphaned inflight matches back to monitoring");
        }
    }
    let store: Arc<dyn MatchStore> = Arc::new(store);

    // --- Odds ---
    let odds_client = scrape::build_client(
        Duration::from_secs(config.odds.request_timeout_secs),
        config.odds.proxy_url.as_deref(),
    )?;
    if let Some(proxy) = &config.odds.proxy_url {
        info!(proxy = %proxy, "odds requests go through proxy");
    }
    let odds = Arc::new(BetExplorerClient::new(odds_client, config.odds.base_url.clone()));

    // --- Notifier ---
    let notifier: Arc<dyn Notifier> = if config.has_telegram() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.telegram.request_timeout_secs))
            .build()?;
        Arc::new(TelegramNotifier::new(
            client,
            &config.telegram.api_url,
            &config.telegram.token,
            config.telegram.default_chat_id,
        ))
    } else {
        warn!("TELEGRAM_TOKEN not set, alerts are only logged");
        Arc::new(LogNotifier)
    };

    let settings = PollSettings {
        poll_interval: config.engine.poll_interval(),
        stale_after: config.engine.stale_after(),
        fetch_policy: RetryPolicy::bounded(
            config.odds.fetch_attempts,
            Duration::from_millis(config.odds.fetch_retry_delay_ms),
        )
        .with_jitter(
            Duration::from_millis(config.odds.jitter_min_ms),
            Duration::from_millis(config.odds.jitter_max_ms),
        ),
        release_policy: RetryPolicy::bounded(5, Duration::from_secs(1)),
    };

    let stats = Arc::new(EngineStats::new());
    spawn_status_reporter(
        stats.clone(),
        Duration::from_secs(config.engine.status_interval_secs),
    );
    spawn_monitoring_sweep(
        store.clone(),
        tx,
        Duration::from_secs(config.engine.sweep_interval_secs),
    );

    let ctx = EngineContext {
        store,
        odds,
        notifier,
        settings,
        stats,
    };
    let restart = RestartPolicy {
        base_delay: Duration::from_millis(config.engine.restart_base_ms),
        max_delay: Duration::from_secs(config.engine.restart_max_secs),
    };

    Ok(AdmissionController::new(ctx, config.engine.capacity, restart, rx))
}
