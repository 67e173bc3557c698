//! WorkQueue - ordered, consumable item sequence with a dependency prefetch window
//!
//! Items are consumed strictly front-to-back. Dependency records are prepared
//! in batches ahead of consumption: whenever the preparer's watermark drops
//! below the threshold, the next batch starting at `prefetch_index` is
//! requested and the index advances by the batch length.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use contracts::{ContractError, DependencyPreparer, DispatchConfig, ItemId, WorkItem};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

/// Default number of items prepared per batch
pub const DEFAULT_PREFETCH_BATCH_SIZE: usize = 100;

/// Prefetching work queue of one publish run
pub struct WorkQueue<P> {
    /// Original order, used to address prefetch batches
    ids: Vec<ItemId>,
    /// Items not yet delivered
    remaining: Mutex<VecDeque<WorkItem>>,
    preparer: Arc<P>,
    prefetch_index: AtomicUsize,
    prefetch_batch_size: usize,
    prefetch_threshold: usize,
    /// Held by the single caller currently preparing a batch
    prefetching: AtomicBool,
}

/// Clears the prefetching flag on every exit path, including cancellation
struct PrefetchGuard<'a>(&'a AtomicBool);

impl Drop for PrefetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<P> WorkQueue<P>
where
    P: DependencyPreparer + Sync,
{
    /// Create a queue with the default window (batch 100, threshold 50)
    pub fn new(items: Vec<WorkItem>, preparer: Arc<P>) -> Self {
        Self::with_prefetch(
            items,
            preparer,
            DEFAULT_PREFETCH_BATCH_SIZE,
            DEFAULT_PREFETCH_BATCH_SIZE / 2,
        )
    }

    /// Create a queue with the window taken from configuration
    pub fn from_config(items: Vec<WorkItem>, preparer: Arc<P>, config: &DispatchConfig) -> Self {
        Self::with_prefetch(
            items,
            preparer,
            config.prefetch_batch_size,
            config.prefetch_threshold(),
        )
    }

    /// Create a queue with an explicit prefetch window
    pub fn with_prefetch(
        items: Vec<WorkItem>,
        preparer: Arc<P>,
        batch_size: usize,
        threshold: usize,
    ) -> Self {
        let ids = items.iter().map(|item| item.id).collect();
        Self {
            ids,
            remaining: Mutex::new(items.into()),
            preparer,
            prefetch_index: AtomicUsize::new(0),
            prefetch_batch_size: batch_size.max(1),
            prefetch_threshold: threshold,
            prefetching: AtomicBool::new(false),
        }
    }

    /// Number of items not yet delivered
    pub fn len(&self) -> usize {
        self.remaining.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.lock().is_empty()
    }

    /// Total items the queue was created with
    pub fn original_len(&self) -> usize {
        self.ids.len()
    }

    /// Index of the first item whose dependencies are not yet requested
    pub fn prefetch_index(&self) -> usize {
        self.prefetch_index.load(Ordering::Acquire)
    }

    pub fn prefetch_batch_size(&self) -> usize {
        self.prefetch_batch_size
    }

    pub fn prefetch_threshold(&self) -> usize {
        self.prefetch_threshold
    }

    /// Remove and return the head item
    ///
    /// Each item is returned to exactly one caller.
    pub fn take_next(&self) -> Option<WorkItem> {
        self.remaining.lock().pop_front()
    }

    /// Request the next dependency batch if the prepared watermark is low
    ///
    /// Returns the prepared index range, or `None` when nothing was due or
    /// another caller is already preparing a batch (that caller is not
    /// waited for; the check repeats on the next call).
    ///
    /// # Errors
    /// Returns the preparer's failure; `prefetch_index` is not advanced.
    #[instrument(level = "trace", name = "work_queue_ensure_prefetched", skip(self))]
    pub async fn ensure_prefetched(&self) -> Result<Option<Range<usize>>, ContractError> {
        if self
            .prefetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("prefetch already in progress, skipping");
            return Ok(None);
        }
        let _guard = PrefetchGuard(&self.prefetching);

        let start = self.prefetch_index.load(Ordering::Acquire);
        if start >= self.ids.len() {
            return Ok(None);
        }

        let prepared = self.preparer.prepared_count();
        if prepared >= self.prefetch_threshold {
            return Ok(None);
        }

        let end = (start + self.prefetch_batch_size).min(self.ids.len());
        let batch = &self.ids[start..end];
        debug!(
            start,
            end,
            prepared,
            threshold = self.prefetch_threshold,
            "Prefetching dependency batch"
        );

        self.preparer.prepare(batch).await?;
        self.prefetch_index.store(end, Ordering::Release);
        observability::record_prefetch_batch(batch.len());

        Ok(Some(start..end))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::Notify;

    /// Preparer whose watermark rises on `prepare` and falls on `consume`
    #[derive(Default)]
    pub(crate) struct CountingPreparer {
        prepared: AtomicUsize,
        pub(crate) batches: Mutex<Vec<Vec<ItemId>>>,
        pub(crate) fail: AtomicBool,
        pub(crate) gate: Option<Arc<Notify>>,
    }

    impl CountingPreparer {
        pub(crate) fn consume(&self, n: usize) {
            let _ = self
                .prepared
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                    Some(p.saturating_sub(n))
                });
        }

        pub(crate) fn ranges(&self) -> Vec<(u64, usize)> {
            self.batches
                .lock()
                .iter()
                .map(|b| (b[0].0, b.len()))
                .collect()
        }
    }

    impl DependencyPreparer for CountingPreparer {
        async fn prepare(&self, ids: &[ItemId]) -> Result<(), ContractError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::Acquire) {
                return Err(ContractError::prepare(ids, "store unavailable"));
            }
            self.batches.lock().push(ids.to_vec());
            self.prepared.fetch_add(ids.len(), Ordering::AcqRel);
            Ok(())
        }

        fn prepared_count(&self) -> usize {
            self.prepared.load(Ordering::Acquire)
        }
    }

    pub(crate) fn items(n: u64) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::new(i, "node-1")).collect()
    }

    #[tokio::test]
    async fn test_take_next_is_front_to_back() {
        let queue = WorkQueue::new(items(3), Arc::new(CountingPreparer::default()));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.take_next().map(|i| i.id), Some(ItemId(0)));
        assert_eq!(queue.take_next().map(|i| i.id), Some(ItemId(1)));
        assert_eq!(queue.take_next().map(|i| i.id), Some(ItemId(2)));
        assert!(queue.take_next().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.original_len(), 3);
    }

    #[tokio::test]
    async fn test_prefetch_windows_over_250_items() {
        let preparer = Arc::new(CountingPreparer::default());
        let queue = WorkQueue::with_prefetch(items(250), Arc::clone(&preparer), 100, 50);

        // Watermark 0 < 50: first batch
        assert_eq!(queue.ensure_prefetched().await.unwrap(), Some(0..100));
        // Watermark 100: nothing due
        assert_eq!(queue.ensure_prefetched().await.unwrap(), None);

        preparer.consume(50);
        // Watermark 50 is not below the threshold
        assert_eq!(queue.ensure_prefetched().await.unwrap(), None);

        preparer.consume(1);
        assert_eq!(queue.ensure_prefetched().await.unwrap(), Some(100..200));

        preparer.consume(100);
        assert_eq!(queue.ensure_prefetched().await.unwrap(), Some(200..250));

        preparer.consume(200);
        // Window exhausted
        assert_eq!(queue.ensure_prefetched().await.unwrap(), None);
        assert_eq!(queue.prefetch_index(), 250);

        assert_eq!(preparer.ranges(), vec![(0, 100), (100, 100), (200, 50)]);
    }

    #[tokio::test]
    async fn test_failed_prefetch_does_not_advance() {
        let preparer = Arc::new(CountingPreparer::default());
        preparer.fail.store(true, Ordering::Release);
        let queue = WorkQueue::with_prefetch(items(10), Arc::clone(&preparer), 4, 2);

        let err = queue.ensure_prefetched().await.unwrap_err();
        assert!(matches!(err, ContractError::Prepare { count: 4, .. }));
        assert_eq!(queue.prefetch_index(), 0);

        // The flag is released, a later call retries the same batch
        preparer.fail.store(false, Ordering::Release);
        assert_eq!(queue.ensure_prefetched().await.unwrap(), Some(0..4));
    }

    #[tokio::test]
    async fn test_concurrent_prefetch_skips_instead_of_waiting() {
        let gate = Arc::new(Notify::new());
        let preparer = Arc::new(CountingPreparer {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        });
        let queue = Arc::new(WorkQueue::with_prefetch(
            items(10),
            Arc::clone(&preparer),
            5,
            2,
        ));

        let first = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.ensure_prefetched().await })
        };
        // Let the first caller reach the gate
        while !queue.prefetching.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }

        assert_eq!(queue.ensure_prefetched().await.unwrap(), None);

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), Some(0..5));
        assert_eq!(preparer.ranges().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_delivers_each_item_once() {
        let queue = Arc::new(WorkQueue::new(
            items(1000),
            Arc::new(CountingPreparer::default()),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(item) = queue.take_next() {
                    taken.push(item.id);
                    tokio::task::yield_now().await;
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 1000);
        assert_eq!(unique.len(), 1000);
    }
}
