//! Collaborator traits - the narrow surface the engine calls into
//!
//! Rendering, storage writers and the persistence layer live outside the
//! engine. Async traits are declared local-first and get a `Send` variant
//! through `trait_variant` so workers can run on a multi-threaded runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ContractError, ItemId, QueueCountRow, TargetId, WorkItem};

/// Bulk dependency preparation (consulted by the work queue's prefetch window)
#[trait_variant::make(DependencyPreparer: Send)]
pub trait LocalDependencyPreparer {
    /// Bulk-load the dependency records of the given items
    ///
    /// # Errors
    /// Returns the backing store failure; the publish run is aborted.
    async fn prepare(&self, ids: &[ItemId]) -> Result<(), ContractError>;

    /// Number of prepared records not yet consumed (current watermark)
    fn prepared_count(&self) -> usize;
}

/// Lazily materializes a work item into a renderable object
#[trait_variant::make(ItemResolver: Send)]
pub trait LocalItemResolver {
    /// Renderable object produced for a work item
    type Resolved: Send + 'static;

    /// # Errors
    /// Returns a domain error; the item is skipped, the run continues.
    async fn resolve(&self, item: &WorkItem) -> Result<Self::Resolved, ContractError>;
}

/// Downstream saturation test polled by the load monitor
///
/// Must be monotone until relieved: once saturated it stays saturated until
/// the downstream consumer has drained.
pub trait SaturationIndicator: Send + Sync {
    /// Indicator name (used for logging/metrics)
    fn name(&self) -> &str;

    /// # Errors
    /// Returns an error when saturation cannot be evaluated; dispatch aborts.
    fn is_saturated(&self) -> Result<bool, ContractError>;
}

/// A downstream worker queue (e.g. an asynchronous writer) that can fill up
pub trait WorkerQueue: Send + Sync {
    fn name(&self) -> &str;

    fn is_full(&self) -> bool;
}

/// Publish-target result callback
pub trait PublishResultListener: Send + Sync {
    fn on_success(&self, target: &TargetId);

    fn on_failure(&self, target: &TargetId);
}

/// Keeps the surrounding publish run alive while workers are still asking
/// for work (e.g. refreshes a watchdog or transaction timeout).
pub trait KeepAlive: Send + Sync {
    fn touch(&self);
}

/// Aggregated timing of one rendering worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Worker identifier (assigned by the orchestrator)
    pub worker_id: usize,
    /// Items handed to this worker
    pub items: u64,
    /// Time spent working on items (between handout and next request)
    pub busy: Duration,
    /// Time spent inside `next()` waiting for work
    pub waiting: Duration,
}

/// Receives periodic per-worker timing reports from the distributor
pub trait WorkerStatsSink: Send + Sync {
    fn report(&self, stats: &[WorkerStats]);
}

/// Grouped aggregate count over the publish queue
#[trait_variant::make(QueueCountSource: Send)]
pub trait LocalQueueCountSource {
    /// One row per (target, object type, action, delayed) group
    ///
    /// # Errors
    /// Returns the backing store failure; the previous snapshot is kept.
    async fn fetch_counts(&self) -> Result<Vec<QueueCountRow>, ContractError>;
}
