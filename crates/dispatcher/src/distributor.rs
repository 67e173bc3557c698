//! Distributor - hands out one work item at a time to rendering workers
//!
//! Every `next()` call runs one critical section: stop check, keep-alive,
//! prefetch, backpressure, then take. The backpressure wait happens inside
//! that section, so a saturated downstream holds back all workers at once.
//! Failures never escape to a worker: they turn into `Done`, `Aborted` or
//! `Skipped`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    DependencyPreparer, DispatchConfig, ItemResolver, KeepAlive, TargetId, WorkItem,
    WorkerStats, WorkerStatsSink,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatchError;
use crate::load::LoadMonitor;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::queue::WorkQueue;
use crate::worker::WorkerToken;

/// Default handout interval between worker stats reports
pub const DEFAULT_STATS_REPORT_EVERY: u64 = 16;

/// Default host load limit
pub const DEFAULT_LOAD_LIMIT: f64 = 2.0;

/// Result of one `Distributor::next` call
#[derive(Debug)]
pub enum Dispatch<T> {
    /// Render this item
    Item { item: WorkItem, resolved: T },
    /// The item could not be resolved; ask again
    Skipped(DispatchError),
    /// Queue drained or run stopped without a cause; the worker should exit
    Done,
    /// Run aborted; the worker should exit
    Aborted(Arc<DispatchError>),
}

impl<T> Dispatch<T> {
    /// Whether the worker should stop asking for work
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }
}

/// End-of-run summary
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: MetricsSnapshot,
    pub remaining: usize,
    pub prefetch_index: usize,
    pub published_per_target: BTreeMap<TargetId, u64>,
    pub worker_stats: Vec<WorkerStats>,
    pub queue_full_wait: Duration,
    pub abort_cause: Option<Arc<DispatchError>>,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        self.abort_cause.is_some()
    }
}

/// Builder for creating a Distributor
pub struct DistributorBuilder<P, R> {
    queue: WorkQueue<P>,
    resolver: Arc<R>,
    load_monitor: LoadMonitor,
    keep_alive: Option<Arc<dyn KeepAlive>>,
    stats_sink: Option<Arc<dyn WorkerStatsSink>>,
    stats_report_every: u64,
    load_limit: f64,
}

impl<P, R> DistributorBuilder<P, R>
where
    P: DependencyPreparer + Sync + 'static,
    R: ItemResolver + Sync + 'static,
{
    pub fn new(queue: WorkQueue<P>, resolver: Arc<R>) -> Self {
        Self {
            queue,
            resolver,
            load_monitor: LoadMonitor::default(),
            keep_alive: None,
            stats_sink: None,
            stats_report_every: DEFAULT_STATS_REPORT_EVERY,
            load_limit: DEFAULT_LOAD_LIMIT,
        }
    }

    pub fn load_monitor(mut self, load_monitor: LoadMonitor) -> Self {
        self.load_monitor = load_monitor;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn stats_sink(mut self, sink: Arc<dyn WorkerStatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    pub fn stats_report_every(mut self, every: u64) -> Self {
        self.stats_report_every = every.max(1);
        self
    }

    pub fn load_limit(mut self, load_limit: f64) -> Self {
        self.load_limit = load_limit;
        self
    }

    #[instrument(
        name = "distributor_builder_build",
        skip(self),
        fields(items = self.queue.original_len())
    )]
    pub fn build(self) -> Distributor<P, R> {
        info!(
            items = self.queue.original_len(),
            prefetch_batch = self.queue.prefetch_batch_size(),
            prefetch_threshold = self.queue.prefetch_threshold(),
            load_limit = self.load_limit,
            "Distributor created"
        );

        Distributor {
            dispatch_lock: tokio::sync::Mutex::new(()),
            queue: self.queue,
            resolver: self.resolver,
            load_monitor: self.load_monitor,
            keep_alive: self.keep_alive,
            stats_sink: self.stats_sink,
            stats_report_every: self.stats_report_every,
            load_limit: self.load_limit,
            stopped: AtomicBool::new(false),
            handout_gate: Mutex::new(()),
            captured_error: Mutex::new(None),
            metrics: DispatchMetrics::new(),
            published_per_target: Mutex::new(HashMap::new()),
            worker_stats: Mutex::new(BTreeMap::new()),
            next_worker_id: AtomicUsize::new(0),
        }
    }
}

/// Thread-safe dispatcher shared by all workers of one publish run
pub struct Distributor<P, R> {
    /// Guards the whole dispatch sequence of one `next()` call
    dispatch_lock: tokio::sync::Mutex<()>,
    queue: WorkQueue<P>,
    resolver: Arc<R>,
    load_monitor: LoadMonitor,
    keep_alive: Option<Arc<dyn KeepAlive>>,
    stats_sink: Option<Arc<dyn WorkerStatsSink>>,
    stats_report_every: u64,
    load_limit: f64,
    /// Monotone: never cleared once set
    stopped: AtomicBool,
    /// Held over the final stop check and the pop, and while setting `stopped`
    handout_gate: Mutex<()>,
    captured_error: Mutex<Option<Arc<DispatchError>>>,
    metrics: DispatchMetrics,
    published_per_target: Mutex<HashMap<TargetId, u64>>,
    worker_stats: Mutex<BTreeMap<usize, WorkerStats>>,
    next_worker_id: AtomicUsize,
}

impl<P, R> Distributor<P, R>
where
    P: DependencyPreparer + Sync + 'static,
    R: ItemResolver + Sync + 'static,
{
    /// Issue a token for a new worker
    pub fn worker_token(&self) -> WorkerToken {
        WorkerToken::new(self.next_worker_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Obtain the next item for the calling worker
    #[instrument(
        level = "debug",
        name = "distributor_next",
        skip(self, token),
        fields(worker = token.worker_id())
    )]
    pub async fn next(&self, token: &mut WorkerToken) -> Dispatch<R::Resolved> {
        let entered = Instant::now();

        let (item, issued) = {
            let _guard = self.dispatch_lock.lock().await;

            // Coming back for more work means the previous item is finished
            if token.enter() {
                self.metrics.dec_active_workers();
            }

            if let Some(outcome) = self.stopped_outcome() {
                return outcome;
            }

            if let Some(keep_alive) = &self.keep_alive {
                keep_alive.touch();
            }

            match self.queue.ensure_prefetched().await {
                Ok(Some(_)) => self.metrics.inc_prefetch_batches(),
                Ok(None) => {}
                Err(e) => return self.abort(DispatchError::PrepareFailed(e)),
            }

            if let Err(e) = self.load_monitor.check_high_load().await {
                return self.abort(DispatchError::BackpressureFailed(e));
            }

            // A stop may have landed while this call was waiting
            let _gate = self.handout_gate.lock();
            if let Some(outcome) = self.stopped_outcome() {
                return outcome;
            }

            let Some(item) = self.queue.take_next() else {
                debug!("Queue drained");
                return Dispatch::Done;
            };

            let issued = self.metrics.inc_issued_count();
            *self
                .published_per_target
                .lock()
                .entry(item.target.clone())
                .or_default() += 1;
            (item, issued)
        };

        // Now rendering
        self.metrics.inc_active_workers();
        token.handed_out(entered.elapsed());
        self.worker_stats.lock().insert(token.worker_id(), token.stats());
        observability::record_item_dispatched(item.target.as_str());

        if issued % self.stats_report_every == 0 {
            self.report_worker_stats();
        }

        match self.resolver.resolve(&item).await {
            Ok(resolved) => Dispatch::Item { item, resolved },
            Err(source) => {
                warn!(item_id = %item.id, target = %item.target, error = %source, "Skipping unresolvable item");
                self.metrics.inc_skipped_count();
                observability::record_item_skipped(item.target.as_str());
                Dispatch::Skipped(DispatchError::ResolutionFailed {
                    item_id: item.id,
                    source,
                })
            }
        }
    }

    fn stopped_outcome(&self) -> Option<Dispatch<R::Resolved>> {
        if !self.stopped.load(Ordering::Acquire) {
            return None;
        }
        Some(match self.captured_error() {
            Some(cause) => Dispatch::Aborted(cause),
            None => Dispatch::Done,
        })
    }

    fn abort(&self, cause: DispatchError) -> Dispatch<R::Resolved> {
        let cause = Arc::new(cause);
        self.stop_with(Some(Arc::clone(&cause)));
        Dispatch::Aborted(cause)
    }

    /// Stop handing out work
    ///
    /// Idempotent and irreversible. A cause given here replaces any cause
    /// captured earlier; `None` leaves a captured cause in place.
    pub fn stop(&self, cause: Option<DispatchError>) {
        self.stop_with(cause.map(Arc::new));
    }

    fn stop_with(&self, cause: Option<Arc<DispatchError>>) {
        if let Some(cause) = cause {
            error!(
                kind = cause.kind(),
                error = %cause,
                source = ?std::error::Error::source(&*cause),
                "Publish run aborted"
            );
            *self.captured_error.lock() = Some(cause);
        }
        let newly_stopped = {
            let _gate = self.handout_gate.lock();
            !self.stopped.swap(true, Ordering::AcqRel)
        };
        if newly_stopped {
            info!(
                issued = self.metrics.issued_count(),
                remaining = self.queue.len(),
                "Distributor stopped"
            );
        }
    }

    fn report_worker_stats(&self) {
        let Some(sink) = &self.stats_sink else {
            return;
        };
        let stats: Vec<WorkerStats> = self.worker_stats.lock().values().cloned().collect();
        debug!(workers = stats.len(), "Reporting worker stats");
        sink.report(&stats);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn captured_error(&self) -> Option<Arc<DispatchError>> {
        self.captured_error.lock().clone()
    }

    /// Workers currently rendering an item
    pub fn active_workers(&self) -> usize {
        self.metrics.active_workers()
    }

    pub fn issued_count(&self) -> u64 {
        self.metrics.issued_count()
    }

    pub fn published_for(&self, target: &str) -> u64 {
        self.published_per_target
            .lock()
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    /// Items not yet handed out
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn load_limit(&self) -> f64 {
        self.load_limit
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn run_report(&self) -> RunReport {
        RunReport {
            metrics: self.metrics(),
            remaining: self.queue.len(),
            prefetch_index: self.queue.prefetch_index(),
            published_per_target: self
                .published_per_target
                .lock()
                .iter()
                .map(|(target, count)| (target.clone(), *count))
                .collect(),
            worker_stats: self.worker_stats.lock().values().cloned().collect(),
            queue_full_wait: self.load_monitor.total_wait(),
            abort_cause: self.captured_error(),
        }
    }
}

/// Convenience function to create a distributor from configuration
pub fn create_distributor<P, R>(
    items: Vec<WorkItem>,
    preparer: Arc<P>,
    resolver: Arc<R>,
    config: &DispatchConfig,
) -> Distributor<P, R>
where
    P: DependencyPreparer + Sync + 'static,
    R: ItemResolver + Sync + 'static,
{
    let queue = WorkQueue::from_config(items, preparer, config);
    DistributorBuilder::new(queue, resolver)
        .load_monitor(LoadMonitor::from_config(config))
        .stats_report_every(config.stats_report_every)
        .load_limit(config.load_limit)
        .build()
}
