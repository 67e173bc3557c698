//! Simulation orchestrator - wires the engine together and runs the workers

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use circuit_breaker::CircuitBreaker;
use contracts::{ObjType, PublishConfig, PublishResultListener, TargetId};
use dispatcher::{
    AsyncWorkerSaturation, BoundedWorkerQueue, Dispatch, DispatchError, Distributor,
    DistributorBuilder, LoadAverageIndicator, LoadMonitor, WorkQueue,
};
use stats_cache::StatsCache;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::sim::{
    generate_items, AggregatingStatsSink, MemoryPreparer, PublishLedger, RenderJob, SimResolver,
    TouchCounter,
};
use super::SimulationStats;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub publish: PublishConfig,
    pub items: u64,
    pub workers: usize,
    pub targets: usize,
    pub render_time: Duration,
    pub write_time: Duration,
    /// Writer queue capacity per target before dispatch is held back
    pub writer_capacity: usize,
    /// Every n-th item fails to resolve (0 = never)
    pub fail_every: u64,
    /// Target whose writes always fail
    pub flaky_target: Option<String>,
    /// Stop the run with a cause after this many handouts
    pub abort_after: Option<u64>,
    pub metrics_port: Option<u16>,
}

type SimDistributor = Distributor<MemoryPreparer, SimResolver>;

struct Shared {
    distributor: SimDistributor,
    breaker: CircuitBreaker,
    ledger: Arc<PublishLedger>,
    writers: Vec<(TargetId, Arc<BoundedWorkerQueue>)>,
    rendered: AtomicU64,
    suppressed: AtomicU64,
    write_time: Duration,
    render_time: Duration,
    flaky_target: Option<TargetId>,
    abort_after: Option<u64>,
}

impl Shared {
    fn writer(&self, target: &TargetId) -> Option<&Arc<BoundedWorkerQueue>> {
        self.writers
            .iter()
            .find_map(|(t, q)| (t == target).then_some(q))
    }
}

pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run until the queue drains, the run aborts or `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<SimulationStats> {
        let start_time = Instant::now();
        let config = &self.config;

        if let Some(port) = config.metrics_port {
            observability::init_metrics_only(port)?;
        }

        let items = generate_items(config.items, config.targets);
        let ledger = Arc::new(PublishLedger::from_items(&items));
        let targets = ledger.targets();

        let stats_cache = StatsCache::new(Arc::clone(&ledger));
        stats_cache
            .start(config.publish.stats.refresh_interval())
            .await;

        // One bounded writer queue per target feeds the saturation check
        let saturation = Arc::new(AsyncWorkerSaturation::new());
        let writers: Vec<_> = targets
            .iter()
            .map(|target| {
                let queue = Arc::new(BoundedWorkerQueue::new(
                    format!("writer-{target}"),
                    config.writer_capacity,
                ));
                saturation.register(queue.clone());
                (target.clone(), queue)
            })
            .collect();

        let dispatch = &config.publish.dispatch;
        let load_monitor = LoadMonitor::new(dispatch.backpressure_poll_interval())
            .with_indicator(saturation)
            .with_indicator(Arc::new(LoadAverageIndicator::new(dispatch.load_limit)));

        let preparer = Arc::new(MemoryPreparer::default());
        let resolver = Arc::new(SimResolver::new(Arc::clone(&preparer), config.fail_every));
        let keep_alive = Arc::new(TouchCounter::default());
        let stats_sink = Arc::new(AggregatingStatsSink::default());

        let distributor = DistributorBuilder::new(
            WorkQueue::from_config(items, Arc::clone(&preparer), dispatch),
            resolver,
        )
        .load_monitor(load_monitor)
        .keep_alive(keep_alive.clone())
        .stats_sink(stats_sink.clone())
        .stats_report_every(dispatch.stats_report_every)
        .load_limit(dispatch.load_limit)
        .build();

        let shared = Arc::new(Shared {
            distributor,
            breaker: CircuitBreaker::from_config(&config.publish.circuit_breaker),
            ledger: Arc::clone(&ledger),
            writers,
            rendered: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            write_time: config.write_time,
            render_time: config.render_time,
            flaky_target: config.flaky_target.as_deref().map(TargetId::from),
            abort_after: config.abort_after,
        });

        info!(
            items = config.items,
            workers = config.workers,
            targets = targets.len(),
            "Starting publish simulation"
        );

        let mut workers = JoinSet::new();
        for _ in 0..config.workers.max(1) {
            workers.spawn(render_worker(Arc::clone(&shared)));
        }
        let mut writes = JoinSet::new();

        tokio::pin!(shutdown);
        let mut shutting_down = false;
        while !workers.is_empty() {
            tokio::select! {
                joined = workers.join_next() => {
                    if let Some(result) = joined {
                        let pending = result.context("Render worker panicked")?;
                        for job in pending {
                            writes.spawn(write_job(Arc::clone(&shared), job, false));
                        }
                    }
                }
                _ = &mut shutdown, if !shutting_down => {
                    warn!("Received shutdown signal, stopping distribution");
                    shared.distributor.stop(None);
                    shutting_down = true;
                }
            }
        }

        while let Some(result) = writes.join_next().await {
            result.context("Writer task panicked")?;
        }
        for (_, writer) in &shared.writers {
            while !writer.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        // Final counts reflect every completed write; the timer is stopped
        // first so no older in-flight refresh can land afterwards
        stats_cache.stop().await;
        if let Err(e) = stats_cache.refresh_now().await {
            warn!(error = %e, "Final stats refresh failed");
        }

        let report = shared.distributor.run_report();
        let worker_summary = stats_sink.finish(&report.worker_stats).summary();
        let page_counts = stats_cache.aggregate(
            ObjType::PAGE,
            |t| ledger.to_publish(t, ObjType::PAGE),
            |t| ledger.published(t, ObjType::PAGE),
            |t| stats_cache.count(t, ObjType::PAGE, false),
            &targets,
        );

        let disabled_targets = targets
            .iter()
            .filter(|t| shared.breaker.retry_at(t).is_some())
            .map(ToString::to_string)
            .collect();

        Ok(SimulationStats {
            duration: start_time.elapsed(),
            rendered: shared.rendered.load(Ordering::Relaxed),
            suppressed: shared.suppressed.load(Ordering::Relaxed),
            prepared_batches: preparer.batches(),
            keep_alive_touches: keep_alive.touches(),
            interrupted: shutting_down,
            report,
            worker_summary,
            page_counts,
            disabled_targets,
        })
    }
}

/// Render items until the distributor says stop
///
/// Returns rendered jobs whose writes could not be queued immediately.
async fn render_worker(shared: Arc<Shared>) -> Vec<RenderJob> {
    let distributor = &shared.distributor;
    let mut token = distributor.worker_token();
    let mut deferred = Vec::new();

    loop {
        match distributor.next(&mut token).await {
            Dispatch::Item { resolved, .. } => {
                if let Some(limit) = shared.abort_after {
                    if distributor.issued_count() >= limit {
                        distributor.stop(Some(DispatchError::unknown(format!(
                            "abort requested after {limit} items"
                        ))));
                    }
                }

                tokio::time::sleep(shared.render_time).await;
                shared.rendered.fetch_add(1, Ordering::Relaxed);

                if shared.breaker.is_disabled(&resolved.target) {
                    debug!(target = %resolved.target, "Target disabled, write suppressed");
                    shared.suppressed.fetch_add(1, Ordering::Relaxed);
                    shared.ledger.dequeue(resolved.item_id);
                    continue;
                }

                match shared.writer(&resolved.target) {
                    Some(writer) if writer.try_push() => {
                        tokio::spawn(write_job(Arc::clone(&shared), resolved, true));
                    }
                    _ => deferred.push(resolved),
                }
            }
            Dispatch::Skipped(DispatchError::ResolutionFailed { item_id, .. }) => {
                shared.ledger.dequeue(item_id);
            }
            Dispatch::Skipped(_) => {}
            Dispatch::Done => break,
            Dispatch::Aborted(cause) => {
                debug!(worker = token.worker_id(), cause = %cause, "Worker exiting on abort");
                break;
            }
        }
    }
    deferred
}

/// Write one rendered job to its target and report the outcome
///
/// `queued` jobs hold a slot in the target's writer queue until done.
async fn write_job(shared: Arc<Shared>, job: RenderJob, queued: bool) {
    tokio::time::sleep(shared.write_time).await;

    if shared.flaky_target.as_ref() == Some(&job.target) {
        shared.breaker.on_failure(&job.target);
    } else {
        shared.breaker.on_success(&job.target);
        shared.ledger.mark_published(&job.target, job.obj_type);
    }
    shared.ledger.dequeue(job.item_id);

    if queued {
        if let Some(writer) = shared.writer(&job.target) {
            writer.complete();
        }
    }
}
