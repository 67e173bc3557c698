//! # Dispatcher
//!
//! 工作分发模块。
//!
//! 负责：
//! - 按原始顺序把 `WorkItem` 逐个分发给渲染 worker
//! - 依赖数据的批量预取（prefetch window）
//! - 下游饱和时的背压等待
//! - 协作式停止与失败原因记录

pub mod distributor;
pub mod error;
pub mod load;
pub mod metrics;
pub mod queue;
pub mod worker;

pub use distributor::{
    create_distributor, Dispatch, Distributor, DistributorBuilder, RunReport,
    DEFAULT_LOAD_LIMIT, DEFAULT_STATS_REPORT_EVERY,
};
pub use error::DispatchError;
pub use load::{AsyncWorkerSaturation, BoundedWorkerQueue, LoadAverageIndicator, LoadMonitor};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use queue::{WorkQueue, DEFAULT_PREFETCH_BATCH_SIZE};
pub use worker::WorkerToken;
