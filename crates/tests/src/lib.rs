//! # Integration Tests
//!
//! 跨 crate 集成测试。
//!
//! 负责：
//! - 配置加载到分发器构建的完整链路
//! - 多 worker 并发分发、预取窗口、背压、协作停止
//! - 熔断器与统计缓存的行为验证

#[cfg(test)]
mod support {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use contracts::{
        ContractError, DependencyPreparer, ItemId, ItemResolver, SaturationIndicator, WorkItem,
    };
    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Preparer whose watermark drops by one per resolved item
    #[derive(Default)]
    pub struct WatermarkPreparer {
        prepared: AtomicUsize,
        /// (first index, len, watermark seen when the batch was requested)
        pub batches: Mutex<Vec<(u64, usize, usize)>>,
    }

    impl WatermarkPreparer {
        pub fn consume(&self) {
            let _ = self
                .prepared
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1));
        }
    }

    impl DependencyPreparer for WatermarkPreparer {
        async fn prepare(&self, ids: &[ItemId]) -> Result<(), ContractError> {
            let seen = self.prepared.load(Ordering::Acquire);
            self.batches.lock().push((ids[0].0, ids.len(), seen));
            self.prepared.fetch_add(ids.len(), Ordering::AcqRel);
            Ok(())
        }

        fn prepared_count(&self) -> usize {
            self.prepared.load(Ordering::Acquire)
        }
    }

    /// Resolver recording when each item was handed out
    pub struct RecordingResolver {
        preparer: Arc<WatermarkPreparer>,
        pub handouts: Mutex<Vec<(u64, Instant)>>,
    }

    impl RecordingResolver {
        pub fn new(preparer: Arc<WatermarkPreparer>) -> Self {
            Self {
                preparer,
                handouts: Mutex::new(Vec::new()),
            }
        }
    }

    impl ItemResolver for RecordingResolver {
        type Resolved = u64;

        async fn resolve(&self, item: &WorkItem) -> Result<u64, ContractError> {
            self.preparer.consume();
            self.handouts.lock().push((item.id.0, Instant::now()));
            Ok(item.id.0)
        }
    }

    #[derive(Default)]
    pub struct Switch(pub AtomicBool);

    impl SaturationIndicator for Switch {
        fn name(&self) -> &str {
            "switch"
        }

        fn is_saturated(&self) -> Result<bool, ContractError> {
            Ok(self.0.load(Ordering::Acquire))
        }
    }

    pub fn items(n: u64, targets: u64) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(i, format!("node-{}", i % targets)))
            .collect()
    }
}

#[cfg(test)]
mod config_tests {
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader};
    use dispatcher::create_distributor;

    use crate::support::{items, RecordingResolver, WatermarkPreparer};

    #[tokio::test]
    async fn test_config_drives_prefetch_window() {
        let config = ConfigLoader::load_from_str(
            "[dispatch]\nprefetch_batch_size = 10\nprefetch_threshold = 3\nload_limit = 50.0\n",
            ConfigFormat::Toml,
        )
        .unwrap();

        let preparer = Arc::new(WatermarkPreparer::default());
        let resolver = Arc::new(RecordingResolver::new(Arc::clone(&preparer)));
        let distributor =
            create_distributor(items(25, 1), Arc::clone(&preparer), resolver, &config.dispatch);
        let mut token = distributor.worker_token();

        while !distributor.next(&mut token).await.is_terminal() {}

        let starts: Vec<_> = preparer.batches.lock().iter().map(|b| (b.0, b.1)).collect();
        assert_eq!(starts, vec![(0, 10), (10, 10), (20, 5)]);
        assert_eq!(distributor.load_limit(), 50.0);
    }
}

#[cfg(test)]
mod dispatch_tests {
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use dispatcher::{Dispatch, DispatchError, DistributorBuilder, LoadMonitor, WorkQueue};

    use crate::support::{items, RecordingResolver, Switch, WatermarkPreparer};

    fn builder(
        n: u64,
    ) -> (
        Arc<WatermarkPreparer>,
        Arc<RecordingResolver>,
        DistributorBuilder<WatermarkPreparer, RecordingResolver>,
    ) {
        let preparer = Arc::new(WatermarkPreparer::default());
        let resolver = Arc::new(RecordingResolver::new(Arc::clone(&preparer)));
        let queue = WorkQueue::with_prefetch(items(n, 4), Arc::clone(&preparer), 100, 50);
        let builder = DistributorBuilder::new(queue, Arc::clone(&resolver));
        (preparer, resolver, builder)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_no_double_delivery_under_many_workers() {
        let (preparer, _, builder) = builder(2_000);
        let distributor = Arc::new(builder.build());

        let workers: Vec<_> = (0..16)
            .map(|_| {
                let distributor = Arc::clone(&distributor);
                tokio::spawn(async move {
                    let mut token = distributor.worker_token();
                    let mut got = Vec::new();
                    while let Dispatch::Item { resolved, .. } = distributor.next(&mut token).await
                    {
                        got.push(resolved);
                    }
                    got
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }

        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 2_000);
        assert_eq!(unique.len(), 2_000);
        assert_eq!(distributor.issued_count(), 2_000);
        assert_eq!(distributor.active_workers(), 0);
        assert_eq!(
            (0..4).map(|t| distributor.published_for(&format!("node-{t}"))).sum::<u64>(),
            2_000
        );

        // Batches are contiguous and cover every item exactly once
        let mut next = 0;
        for (start, len, _) in preparer.batches.lock().iter() {
            assert_eq!(*start, next);
            next += *len as u64;
        }
        assert_eq!(next, 2_000);
    }

    #[tokio::test]
    async fn test_prefetch_triggers_below_threshold() {
        let (preparer, _, builder) = builder(250);
        let distributor = builder.build();
        let mut token = distributor.worker_token();

        while !distributor.next(&mut token).await.is_terminal() {}

        let batches = preparer.batches.lock().clone();
        let ranges: Vec<_> = batches.iter().map(|b| (b.0, b.1)).collect();
        assert_eq!(ranges, vec![(0, 100), (100, 100), (200, 50)]);
        for (_, _, watermark) in &batches {
            assert!(*watermark < 50, "requested at watermark {watermark}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_delivered_while_saturated() {
        let switch = Arc::new(Switch::default());
        switch.0.store(true, Ordering::Release);
        let (_, resolver, builder) = builder(20);
        let distributor = Arc::new(
            builder
                .load_monitor(
                    LoadMonitor::new(Duration::from_millis(100)).with_indicator(switch.clone()),
                )
                .build(),
        );

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let distributor = Arc::clone(&distributor);
                tokio::spawn(async move {
                    let mut token = distributor.worker_token();
                    while !distributor.next(&mut token).await.is_terminal() {}
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(distributor.issued_count(), 0);
        assert!(resolver.handouts.lock().is_empty());

        let cleared_at = tokio::time::Instant::now();
        switch.0.store(false, Ordering::Release);
        for worker in workers {
            worker.await.unwrap();
        }

        let handouts = resolver.handouts.lock();
        assert_eq!(handouts.len(), 20);
        assert!(handouts.iter().all(|(_, at)| *at >= cleared_at));
        assert!(distributor.run_report().queue_full_wait >= Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_reaches_every_worker() {
        let (_, _, builder) = builder(10_000);
        let distributor = Arc::new(builder.build());
        let workers = 6;

        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let distributor = Arc::clone(&distributor);
                tokio::spawn(async move {
                    let mut token = distributor.worker_token();
                    let mut handled = 0;
                    loop {
                        match distributor.next(&mut token).await {
                            Dispatch::Item { .. } => {
                                handled += 1;
                                if i == 0 && handled == 10 {
                                    distributor.stop(Some(DispatchError::unknown("render failed")));
                                    let issued = distributor.issued_count();
                                    return (None, Some(issued));
                                }
                                tokio::task::yield_now().await;
                            }
                            Dispatch::Skipped(_) => {}
                            Dispatch::Done => return (None, None),
                            Dispatch::Aborted(cause) => return (Some(cause), None),
                        }
                    }
                })
            })
            .collect();

        let mut causes = Vec::new();
        let mut issued_at_stop = 0;
        for handle in handles {
            let (cause, issued) = handle.await.unwrap();
            causes.extend(cause);
            issued_at_stop = issued_at_stop.max(issued.unwrap_or(0));
        }

        let captured = distributor.captured_error().expect("cause captured");
        assert_eq!(causes.len(), workers - 1);
        assert!(causes.iter().all(|c| Arc::ptr_eq(c, &captured)));
        assert_eq!(distributor.issued_count(), issued_at_stop);
        assert!(distributor.remaining() > 0);
        assert!(distributor.run_report().is_aborted());
    }
}

#[cfg(test)]
mod breaker_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, Utc};
    use circuit_breaker::{CircuitBreaker, ManualClock};
    use contracts::{CircuitBreakerConfig, PublishResultListener, TargetId};

    #[test]
    fn test_disable_and_reopen_on_simulated_time() {
        let opened_at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(opened_at));
        let config = CircuitBreakerConfig {
            max_error_count: 3,
            retry_delay_secs: 60,
        };
        let breaker = CircuitBreaker::with_clock(
            config.max_error_count,
            config.retry_delay(),
            clock.clone(),
        );
        let listener: &dyn PublishResultListener = &breaker;
        let target = TargetId::from("node-1");

        for _ in 0..3 {
            listener.on_failure(&target);
        }
        assert!(!breaker.is_disabled(&target));

        listener.on_failure(&target);
        assert!(breaker.is_disabled(&target));
        assert_eq!(breaker.retry_at(&target), Some(opened_at + TimeDelta::seconds(60)));

        clock.set(opened_at + TimeDelta::seconds(60));
        assert!(!breaker.is_disabled(&target));
        // Reopened without a success call
        assert!(!breaker.is_disabled(&target));
        assert!(breaker.retry_at(&target).is_none());
    }

    #[test]
    fn test_reconfigure_off_stops_disabling() {
        let breaker = CircuitBreaker::with_clock(
            1,
            Duration::from_secs(60),
            Arc::new(ManualClock::default()),
        );
        let target = TargetId::from("node-1");
        breaker.record_failure(&target);
        breaker.record_failure(&target);
        assert!(breaker.is_disabled(&target));

        breaker.configure(0, Duration::from_secs(60));
        assert!(!breaker.is_disabled(&target));
    }
}

#[cfg(test)]
mod stats_tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{ContractError, ObjType, QueueAction, QueueCountRow, QueueCountSource, TargetId};
    use stats_cache::StatsCache;

    /// All rows of one refresh carry the refresh number
    #[derive(Default)]
    struct Generations(AtomicU64);

    impl QueueCountSource for Generations {
        async fn fetch_counts(&self) -> Result<Vec<QueueCountRow>, ContractError> {
            let n = self.0.fetch_add(1, Ordering::AcqRel) + 1;
            let mut rows = Vec::new();
            for target in ["node-1", "node-2"] {
                for obj_type in [ObjType::PAGE, ObjType::FILE] {
                    rows.push(QueueCountRow {
                        target: TargetId::from(target),
                        obj_type,
                        action: QueueAction::Create,
                        delayed: n % 2 == 0,
                        count: n,
                    });
                    tokio::task::yield_now().await;
                }
            }
            Ok(rows)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_see_whole_snapshots_during_background_refresh() {
        let cache = StatsCache::new(Arc::new(Generations::default()));
        cache.start(Duration::from_millis(1)).await;

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let mut seen = 0;
                    for _ in 0..2_000 {
                        let snapshot = cache.snapshot();
                        let generation = snapshot.generation();
                        if generation == 0 {
                            assert!(snapshot.is_empty());
                        } else {
                            let delayed = generation % 2 == 0;
                            for target in ["node-1", "node-2"] {
                                for obj_type in [ObjType::PAGE, ObjType::FILE] {
                                    assert_eq!(snapshot.count(target, obj_type, delayed), generation);
                                    assert_eq!(snapshot.count(target, obj_type, !delayed), 0);
                                }
                            }
                        }
                        seen = seen.max(generation);
                        tokio::task::yield_now().await;
                    }
                    seen
                })
            })
            .collect();

        for reader in readers {
            reader.await.unwrap();
        }
        cache.stop().await;
        assert!(!cache.is_running());
        assert!(cache.snapshot().generation() >= 1);
    }
}
