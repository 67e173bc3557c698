//! In-memory collaborators used by the simulator
//!
//! They stand in for the dependency store, the object resolver, the
//! target writers and the queue-count query of a real deployment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use contracts::{
    ContractError, DependencyPreparer, ItemId, ItemResolver, KeepAlive, ObjType, QueueAction,
    QueueCountRow, QueueCountSource, TargetId, WorkItem, WorkerStats, WorkerStatsSink,
};
use observability::WorkerStatsAggregator;
use parking_lot::Mutex;
use tracing::trace;

/// Build `count` items spread round-robin over `targets` targets
///
/// Every third item is a file, the rest are pages; every tenth is delayed.
pub fn generate_items(count: u64, targets: usize) -> Vec<WorkItem> {
    let targets = targets.max(1) as u64;
    (0..count)
        .map(|i| {
            let obj_type = if i % 3 == 2 { ObjType::FILE } else { ObjType::PAGE };
            WorkItem::new(i, format!("node-{}", i % targets))
                .with_attribute("obj_type", obj_type.0.to_string())
                .with_attribute("delayed", (i % 10 == 9).to_string())
        })
        .collect()
}

pub fn obj_type_of(item: &WorkItem) -> ObjType {
    item.attribute("obj_type")
        .and_then(|v| v.parse().ok())
        .map_or(ObjType::PAGE, ObjType)
}

/// Dependency store with a consumable prepared-record watermark
#[derive(Debug, Default)]
pub struct MemoryPreparer {
    prepared: AtomicUsize,
    batches: AtomicU64,
}

impl MemoryPreparer {
    pub fn consume(&self) {
        let _ = self
            .prepared
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1));
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

impl DependencyPreparer for MemoryPreparer {
    async fn prepare(&self, ids: &[ItemId]) -> Result<(), ContractError> {
        tokio::task::yield_now().await;
        self.prepared.fetch_add(ids.len(), Ordering::AcqRel);
        self.batches.fetch_add(1, Ordering::Relaxed);
        trace!(len = ids.len(), "Prepared dependency batch");
        Ok(())
    }

    fn prepared_count(&self) -> usize {
        self.prepared.load(Ordering::Acquire)
    }
}

/// Object ready to be rendered
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub item_id: ItemId,
    pub target: TargetId,
    pub obj_type: ObjType,
}

/// Resolver that consumes one prepared record per item
///
/// With `fail_every = n > 0`, every n-th item id cannot be resolved.
pub struct SimResolver {
    preparer: Arc<MemoryPreparer>,
    fail_every: u64,
}

impl SimResolver {
    pub fn new(preparer: Arc<MemoryPreparer>, fail_every: u64) -> Self {
        Self {
            preparer,
            fail_every,
        }
    }
}

impl ItemResolver for SimResolver {
    type Resolved = RenderJob;

    async fn resolve(&self, item: &WorkItem) -> Result<RenderJob, ContractError> {
        self.preparer.consume();
        if self.fail_every > 0 && item.id.0 % self.fail_every == self.fail_every - 1 {
            return Err(ContractError::resolve(item.id, "object no longer exists"));
        }
        Ok(RenderJob {
            item_id: item.id,
            target: item.target.clone(),
            obj_type: obj_type_of(item),
        })
    }
}

/// Per-target publish bookkeeping shared by writers and the count query
#[derive(Debug, Default)]
pub struct PublishLedger {
    /// (target, obj type, delayed) -> still queued
    queued: Mutex<HashMap<(TargetId, ObjType, bool), u64>>,
    /// Queue key of every item not yet dequeued
    pending: Mutex<HashMap<ItemId, (TargetId, ObjType, bool)>>,
    to_publish: Mutex<HashMap<(TargetId, ObjType), u64>>,
    published: Mutex<HashMap<(TargetId, ObjType), u64>>,
}

impl PublishLedger {
    pub fn from_items(items: &[WorkItem]) -> Self {
        let ledger = Self::default();
        {
            let mut queued = ledger.queued.lock();
            let mut to_publish = ledger.to_publish.lock();
            let mut pending = ledger.pending.lock();
            for item in items {
                let delayed = item.attribute("delayed") == Some("true");
                let obj_type = obj_type_of(item);
                let key = (item.target.clone(), obj_type, delayed);
                *queued.entry(key.clone()).or_default() += 1;
                pending.insert(item.id, key);
                *to_publish
                    .entry((item.target.clone(), obj_type))
                    .or_default() += 1;
            }
        }
        ledger
    }

    /// An item left the queue (written, failed, suppressed or skipped)
    ///
    /// Unknown or already dequeued ids are ignored.
    pub fn dequeue(&self, id: ItemId) {
        let Some(key) = self.pending.lock().remove(&id) else {
            return;
        };
        if let Some(n) = self.queued.lock().get_mut(&key) {
            *n = n.saturating_sub(1);
        }
    }

    pub fn mark_published(&self, target: &TargetId, obj_type: ObjType) {
        *self
            .published
            .lock()
            .entry((target.clone(), obj_type))
            .or_default() += 1;
    }

    pub fn to_publish(&self, target: &TargetId, obj_type: ObjType) -> u64 {
        self.to_publish
            .lock()
            .get(&(target.clone(), obj_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn published(&self, target: &TargetId, obj_type: ObjType) -> u64 {
        self.published
            .lock()
            .get(&(target.clone(), obj_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<_> = self
            .to_publish
            .lock()
            .keys()
            .map(|(target, _)| target.clone())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

impl QueueCountSource for PublishLedger {
    async fn fetch_counts(&self) -> Result<Vec<QueueCountRow>, ContractError> {
        let queued = self.queued.lock();
        let mut rows: Vec<QueueCountRow> = queued
            .iter()
            .map(|((target, obj_type, delayed), count)| QueueCountRow {
                target: target.clone(),
                obj_type: *obj_type,
                action: QueueAction::Modify,
                delayed: *delayed,
                count: *count,
            })
            .collect();
        // Removal entries sit in the same queue but never count
        rows.extend(self.targets().into_iter().map(|target| QueueCountRow {
            target,
            obj_type: ObjType::PAGE,
            action: QueueAction::Delete,
            delayed: false,
            count: 1,
        }));
        Ok(rows)
    }
}

/// Keep-alive that just counts touches
#[derive(Debug, Default)]
pub struct TouchCounter(AtomicU64);

impl TouchCounter {
    pub fn touches(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl KeepAlive for TouchCounter {
    fn touch(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stats sink feeding the observability aggregator
#[derive(Debug, Default)]
pub struct AggregatingStatsSink {
    aggregator: Mutex<WorkerStatsAggregator>,
}

impl AggregatingStatsSink {
    pub fn finish(&self, last: &[WorkerStats]) -> WorkerStatsAggregator {
        let mut aggregator = self.aggregator.lock();
        aggregator.update(last);
        aggregator.clone()
    }
}

impl WorkerStatsSink for AggregatingStatsSink {
    fn report(&self, stats: &[WorkerStats]) {
        self.aggregator.lock().update(stats);
    }
}
