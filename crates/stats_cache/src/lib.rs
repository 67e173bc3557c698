//! # Stats Cache
//!
//! 发布队列统计缓存。
//!
//! 后台任务定期执行分组计数查询，在锁外构建新的 `StatsSnapshot`，
//! 然后整体替换；读者只克隆 `Arc`，永远不会等待刷新，
//! 也不会看到新旧混合的数据。

mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use contracts::{ContractError, ObjType, QueueCountSource, TargetId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

pub use snapshot::StatsSnapshot;

/// Upper bound on waiting for an in-flight refresh during `stop`
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts for one object type summed over a set of targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishCounts {
    pub to_publish: u64,
    pub published: u64,
    pub remaining: u64,
    pub delayed: u64,
}

struct Refresher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodically refreshed queue counts
pub struct StatsCache<S> {
    source: Arc<S>,
    snapshot: RwLock<Arc<StatsSnapshot>>,
    generation: AtomicU64,
    refresher: Mutex<Option<Refresher>>,
}

impl<S> StatsCache<S>
where
    S: QueueCountSource + Sync + 'static,
{
    pub fn new(source: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            source,
            snapshot: RwLock::new(Arc::new(StatsSnapshot::default())),
            generation: AtomicU64::new(0),
            refresher: Mutex::new(None),
        })
    }

    /// Start (or restart) the background refresher
    ///
    /// Refreshes immediately, then every `interval`.
    #[instrument(name = "stats_cache_start", skip(self))]
    pub async fn start(self: &Arc<Self>, interval: Duration) {
        self.stop().await;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = Weak::upgrade(&cache) else { break };
                        // Failures are logged and keep the previous snapshot
                        let _ = cache.refresh_now().await;
                    }
                }
            }
            debug!("Stats refresher stopped");
        });

        *self.refresher.lock() = Some(Refresher { shutdown, handle });
        info!(interval_ms = interval.as_millis() as u64, "Stats refresher started");
    }

    /// Stop the background refresher; safe to call repeatedly
    #[instrument(name = "stats_cache_stop", skip(self))]
    pub async fn stop(&self) {
        let Some(Refresher { shutdown, mut handle }) = self.refresher.lock().take() else {
            return;
        };
        let _ = shutdown.send(true);

        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("Stats refresher joined"),
            Ok(Err(e)) => error!(error = ?e, "Stats refresher task panicked"),
            Err(_) => {
                warn!(
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "Stats refresh still running, aborting"
                );
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.refresher
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run the count query once and swap in the new snapshot
    ///
    /// # Errors
    /// Returns the query failure; the previous snapshot stays in place.
    pub async fn refresh_now(&self) -> Result<(), ContractError> {
        let started = Instant::now();
        let rows = match self.source.fetch_counts().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Stats refresh failed, keeping previous snapshot");
                observability::record_stats_refresh(false, 0, started.elapsed());
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let next = Arc::new(StatsSnapshot::from_rows(&rows, generation));
        *self.snapshot.write() = next;

        debug!(rows = rows.len(), generation, "Stats snapshot refreshed");
        observability::record_stats_refresh(true, rows.len(), started.elapsed());
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<StatsSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn count(&self, target: &str, obj_type: ObjType, delayed: bool) -> u64 {
        self.snapshot().count(target, obj_type, delayed)
    }

    /// Sum counts for `obj_type` over `targets`
    ///
    /// Delayed counts come from the cache; the other three from the caller.
    pub fn aggregate<'a, T, P, R>(
        &self,
        obj_type: ObjType,
        to_publish: T,
        published: P,
        remaining: R,
        targets: impl IntoIterator<Item = &'a TargetId>,
    ) -> PublishCounts
    where
        T: Fn(&TargetId) -> u64,
        P: Fn(&TargetId) -> u64,
        R: Fn(&TargetId) -> u64,
    {
        let snapshot = self.snapshot();
        targets
            .into_iter()
            .fold(PublishCounts::default(), |mut acc, target| {
                acc.to_publish += to_publish(target);
                acc.published += published(target);
                acc.remaining += remaining(target);
                acc.delayed += snapshot.count(target, obj_type, true);
                acc
            })
    }
}
