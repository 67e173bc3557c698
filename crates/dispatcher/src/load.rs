//! LoadMonitor - backpressure over downstream consumers
//!
//! `check_high_load` returns immediately when nothing is saturated. Otherwise
//! it sleeps the poll interval and re-polls until every indicator reports
//! relief. The wait uses bounded sleeps, so a cancelled caller never hangs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, DispatchConfig, SaturationIndicator, WorkerQueue};
use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

/// Default sleep between saturation polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Polls saturation indicators and holds the caller while any is saturated
pub struct LoadMonitor {
    indicators: Vec<Arc<dyn SaturationIndicator>>,
    poll_interval: Duration,
    /// Cumulative queue-full wait
    total_wait: Mutex<Duration>,
}

impl std::fmt::Debug for LoadMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadMonitor")
            .field(
                "indicators",
                &self.indicators.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("poll_interval", &self.poll_interval)
            .field("total_wait", &self.total_wait())
            .finish()
    }
}

impl Default for LoadMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Queue-full-wait timer; adds the elapsed time on every exit path
struct WaitTimer<'a> {
    started: Instant,
    total: &'a Mutex<Duration>,
}

impl Drop for WaitTimer<'_> {
    fn drop(&mut self) {
        let waited = self.started.elapsed();
        *self.total.lock() += waited;
        observability::record_queue_full_wait(waited);
    }
}

impl LoadMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            indicators: Vec::new(),
            poll_interval,
            total_wait: Mutex::new(Duration::ZERO),
        }
    }

    /// Monitor with the configured poll interval and the host load indicator
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.backpressure_poll_interval())
            .with_indicator(Arc::new(LoadAverageIndicator::new(config.load_limit)))
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn SaturationIndicator>) -> Self {
        self.indicators.push(indicator);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Cumulative time callers spent waiting for downstream relief
    pub fn total_wait(&self) -> Duration {
        *self.total_wait.lock()
    }

    /// Name of the first saturated indicator
    fn first_saturated(&self) -> Result<Option<&str>, ContractError> {
        for indicator in &self.indicators {
            if indicator.is_saturated()? {
                return Ok(Some(indicator.name()));
            }
        }
        Ok(None)
    }

    /// Block while any downstream consumer is saturated
    ///
    /// Returns how long the caller was held back.
    ///
    /// # Errors
    /// Returns the first indicator failure; the wait ends immediately.
    #[instrument(level = "trace", name = "load_monitor_check_high_load", skip(self))]
    pub async fn check_high_load(&self) -> Result<Duration, ContractError> {
        let Some(indicator) = self.first_saturated()? else {
            return Ok(Duration::ZERO);
        };

        debug!(indicator, "Downstream saturated, holding dispatch");
        let timer = WaitTimer {
            started: Instant::now(),
            total: &self.total_wait,
        };

        loop {
            sleep(self.poll_interval).await;
            if self.first_saturated()?.is_none() {
                break;
            }
        }

        let waited = timer.started.elapsed();
        drop(timer);
        debug!(waited_ms = waited.as_millis() as u64, "Downstream relieved");
        Ok(waited)
    }
}

/// Saturated iff at least one registered downstream worker queue is full
///
/// Used for asynchronous writers that render into bounded queues drained by
/// their own worker tasks.
#[derive(Default)]
pub struct AsyncWorkerSaturation {
    queues: RwLock<Vec<Arc<dyn WorkerQueue>>>,
}

impl AsyncWorkerSaturation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue: Arc<dyn WorkerQueue>) {
        self.queues.write().push(queue);
    }

    pub fn queue_count(&self) -> usize {
        self.queues.read().len()
    }
}

impl SaturationIndicator for AsyncWorkerSaturation {
    fn name(&self) -> &str {
        "async_workers"
    }

    fn is_saturated(&self) -> Result<bool, ContractError> {
        Ok(self.queues.read().iter().any(|queue| queue.is_full()))
    }
}

/// Counting bounded queue of a downstream asynchronous worker
#[derive(Debug)]
pub struct BoundedWorkerQueue {
    name: String,
    capacity: usize,
    len: AtomicUsize,
}

impl BoundedWorkerQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue one job; false if the queue is full
    pub fn try_push(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            })
            .is_ok()
    }

    /// Mark one job as drained
    pub fn complete(&self) {
        let _ = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                Some(len.saturating_sub(1))
            });
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorkerQueue for BoundedWorkerQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}

/// Saturated while the host's 1-minute load average exceeds the limit
///
/// Hosts without `/proc/loadavg` are never considered saturated.
#[derive(Debug, Clone)]
pub struct LoadAverageIndicator {
    limit: f64,
    source: PathBuf,
}

impl LoadAverageIndicator {
    pub fn new(limit: f64) -> Self {
        Self::with_source(limit, "/proc/loadavg")
    }

    pub fn with_source(limit: f64, source: impl Into<PathBuf>) -> Self {
        Self {
            limit,
            source: source.into(),
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }
}

fn parse_load_average(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

impl SaturationIndicator for LoadAverageIndicator {
    fn name(&self) -> &str {
        "load_average"
    }

    fn is_saturated(&self) -> Result<bool, ContractError> {
        let content = match std::fs::read_to_string(&self.source) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ContractError::saturation(self.name(), e.to_string())),
        };

        let load = parse_load_average(&content).ok_or_else(|| {
            ContractError::saturation(
                self.name(),
                format!("unparsable load average in {}", self.source.display()),
            )
        })?;
        Ok(load > self.limit)
    }
}
