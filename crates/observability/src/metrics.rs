//! 发布运行指标收集模块
//!
//! 分发器、熔断器和统计缓存在关键路径上调用这里的函数记录 Prometheus 指标；
//! `WorkerStatsAggregator` 在内存中汇总 worker 耗时，用于运行结束时输出摘要。

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::WorkerStats;
use metrics::{counter, gauge, histogram};

/// 记录当前正在渲染的 worker 数
pub fn record_active_workers(active: usize) {
    gauge!("publish_active_workers").set(active as f64);
}

/// 记录一次依赖预取批次
pub fn record_prefetch_batch(len: usize) {
    counter!("publish_prefetch_batches_total").increment(1);
    histogram!("publish_prefetch_batch_size").record(len as f64);
}

/// 记录一次因下游饱和而等待的时长
pub fn record_queue_full_wait(waited: Duration) {
    counter!("publish_queue_full_waits_total").increment(1);
    histogram!("publish_queue_full_wait_ms").record(waited.as_secs_f64() * 1000.0);
}

/// 记录分发出的条目（按发布目标）
pub fn record_item_dispatched(target: &str) {
    counter!(
        "publish_items_dispatched_total",
        "target" => target.to_string()
    )
    .increment(1);
}

/// 记录因无法解析而跳过的条目
pub fn record_item_skipped(target: &str) {
    counter!(
        "publish_items_skipped_total",
        "target" => target.to_string()
    )
    .increment(1);
}

/// 记录发布目标的写入结果
pub fn record_publish_result(target: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "publish_target_results_total",
        "target" => target.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录熔断器打开（目标被暂时禁用）
pub fn record_breaker_tripped(target: &str, error_count: i64) {
    counter!(
        "publish_breaker_trips_total",
        "target" => target.to_string()
    )
    .increment(1);
    gauge!(
        "publish_breaker_error_count",
        "target" => target.to_string()
    )
    .set(error_count as f64);
}

/// 记录熔断器重新放行
pub fn record_breaker_reopened(target: &str) {
    counter!(
        "publish_breaker_reopens_total",
        "target" => target.to_string()
    )
    .increment(1);
}

/// 记录一次统计缓存刷新
pub fn record_stats_refresh(success: bool, rows: usize, elapsed: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("publish_stats_refreshes_total", "status" => status).increment(1);
    if success {
        gauge!("publish_stats_rows").set(rows as f64);
    }
    histogram!("publish_stats_refresh_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// Worker 耗时聚合器
///
/// 每个 worker 只保留最新一次上报（上报是累计值），摘要时再做统计。
#[derive(Debug, Clone, Default)]
pub struct WorkerStatsAggregator {
    latest: BTreeMap<usize, WorkerStats>,
    reports: u64,
}

impl WorkerStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一次上报
    pub fn update(&mut self, stats: &[WorkerStats]) {
        self.reports += 1;
        for s in stats {
            self.latest.insert(s.worker_id, s.clone());
        }
    }

    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// 生成摘要报告
    pub fn summary(&self) -> WorkerSummary {
        let mut per_item_ms = RunningStats::default();
        let mut waiting_ms = RunningStats::default();
        let mut total_items = 0;

        for s in self.latest.values() {
            total_items += s.items;
            waiting_ms.push(s.waiting.as_secs_f64() * 1000.0);
            if s.items > 0 {
                per_item_ms.push(s.busy.as_secs_f64() * 1000.0 / s.items as f64);
            }
        }

        WorkerSummary {
            workers: self.latest.len(),
            total_items,
            busy_per_item_ms: StatsSummary::from(&per_item_ms),
            waiting_ms: StatsSummary::from(&waiting_ms),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Worker 摘要
#[derive(Debug, Clone, Default)]
pub struct WorkerSummary {
    pub workers: usize,
    pub total_items: u64,
    pub busy_per_item_ms: StatsSummary,
    pub waiting_ms: StatsSummary,
}

impl std::fmt::Display for WorkerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Worker Summary ===")?;
        writeln!(f, "Workers: {}", self.workers)?;
        writeln!(f, "Items rendered: {}", self.total_items)?;
        writeln!(f, "Busy per item (ms): {}", self.busy_per_item_ms)?;
        writeln!(f, "Waiting (ms): {}", self.waiting_ms)
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "N/A");
        }
        write!(
            f,
            "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
            self.min, self.max, self.mean, self.std_dev, self.count
        )
    }
}

/// 在线统计 (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}
