//! # Circuit Breaker
//!
//! 发布目标熔断器。
//!
//! 某个目标连续失败超过 `max_error_count` 次后，在 `retry_delay` 内被禁用；
//! 到期后第一次查询自动放行（清除重试时间，保留错误计数），
//! 一次成功写入清除全部错误状态。

mod clock;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use contracts::{CircuitBreakerConfig, PublishResultListener, TargetId};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, SystemClock};

#[derive(Debug, Default, Clone)]
struct TargetState {
    error_count: i64,
    retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    max_error_count: i64,
    retry_delay: Duration,
    targets: HashMap<TargetId, TargetState>,
}

impl Inner {
    fn is_active(&self) -> bool {
        self.max_error_count > 0 && !self.retry_delay.is_zero()
    }
}

/// Per-target error counter with timed disable
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("max_error_count", &inner.max_error_count)
            .field("retry_delay", &inner.retry_delay)
            .field("targets", &inner.targets.len())
            .finish()
    }
}

impl Default for CircuitBreaker {
    /// Disabling inactive until configured
    fn default() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl CircuitBreaker {
    pub fn new(max_error_count: i64, retry_delay: Duration) -> Self {
        Self::with_clock(max_error_count, retry_delay, Arc::new(SystemClock))
    }

    pub fn with_clock(max_error_count: i64, retry_delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                max_error_count,
                retry_delay,
                targets: HashMap::new(),
            }),
            clock,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.max_error_count, config.retry_delay())
    }

    /// Replace the thresholds; recorded error state is kept
    pub fn configure(&self, max_error_count: i64, retry_delay: Duration) {
        let mut inner = self.inner.lock();
        inner.max_error_count = max_error_count;
        inner.retry_delay = retry_delay;
        info!(
            max_error_count,
            retry_delay_secs = retry_delay.as_secs(),
            active = inner.is_active(),
            "Circuit breaker configured"
        );
    }

    /// Whether publishing to `target` should be skipped right now
    ///
    /// An expired retry window is cleared on this call, so the first check
    /// after the delay lets the target through again.
    pub fn is_disabled(&self, target: &TargetId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_active() {
            return false;
        }
        let Some(state) = inner.targets.get_mut(target) else {
            return false;
        };
        let Some(retry_at) = state.retry_at else {
            return false;
        };

        if self.clock.now() >= retry_at {
            state.retry_at = None;
            info!(
                %target,
                error_count = state.error_count,
                "Retrying previously disabled publish target"
            );
            observability::record_breaker_reopened(target.as_str());
            return false;
        }
        true
    }

    pub fn record_failure(&self, target: &TargetId) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let active = inner.is_active();
        let max_error_count = inner.max_error_count;
        let retry_delay = inner.retry_delay;

        let state = inner.targets.entry(target.clone()).or_default();
        state.error_count += 1;
        debug!(%target, error_count = state.error_count, "Publish target failure recorded");

        if active && state.error_count > max_error_count {
            let delay = TimeDelta::from_std(retry_delay).unwrap_or(TimeDelta::MAX);
            let retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            state.retry_at = Some(retry_at);
            warn!(
                %target,
                error_count = state.error_count,
                retry_at = %retry_at.to_rfc3339(),
                "Disabling publish target after repeated failures"
            );
            observability::record_breaker_tripped(target.as_str(), state.error_count);
        }
    }

    /// Clear the error state of `target`; returns whether there was any
    pub fn record_success(&self, target: &TargetId) -> bool {
        let Some(state) = self.inner.lock().targets.remove(target) else {
            return false;
        };
        let had_errors = state.error_count > 0 || state.retry_at.is_some();
        if had_errors {
            info!(%target, error_count = state.error_count, "Publish target recovered");
        }
        had_errors
    }

    pub fn error_count(&self, target: &TargetId) -> i64 {
        self.inner
            .lock()
            .targets
            .get(target)
            .map_or(0, |s| s.error_count)
    }

    pub fn retry_at(&self, target: &TargetId) -> Option<DateTime<Utc>> {
        self.inner.lock().targets.get(target).and_then(|s| s.retry_at)
    }
}

impl PublishResultListener for CircuitBreaker {
    fn on_success(&self, target: &TargetId) {
        observability::record_publish_result(target.as_str(), true);
        self.record_success(target);
    }

    fn on_failure(&self, target: &TargetId) {
        observability::record_publish_result(target.as_str(), false);
        self.record_failure(target);
    }
}
