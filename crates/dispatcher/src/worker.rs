//! WorkerToken - per-worker handle passed into `Distributor::next`
//!
//! The token is owned by the worker. Its "seen before" flag lets the
//! distributor tell a worker's first request from a worker coming back
//! after finishing an item, and it accumulates the worker's timing.

use std::time::Duration;

use contracts::WorkerStats;
use tokio::time::Instant;

#[derive(Debug)]
pub struct WorkerToken {
    worker_id: usize,
    seen: bool,
    items: u64,
    busy: Duration,
    waiting: Duration,
    last_handout: Option<Instant>,
}

impl WorkerToken {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            seen: false,
            items: 0,
            busy: Duration::ZERO,
            waiting: Duration::ZERO,
            last_handout: None,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// True until the first call to `Distributor::next`
    pub fn is_first_call(&self) -> bool {
        !self.seen
    }

    pub fn items(&self) -> u64 {
        self.items
    }

    /// Marks the token as seen; returns whether it had been seen before.
    ///
    /// Closes the busy interval opened by the previous handout.
    pub(crate) fn enter(&mut self) -> bool {
        if let Some(handout) = self.last_handout.take() {
            self.busy += handout.elapsed();
        }
        std::mem::replace(&mut self.seen, true)
    }

    pub(crate) fn handed_out(&mut self, waited: Duration) {
        self.items += 1;
        self.waiting += waited;
        self.last_handout = Some(Instant::now());
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            worker_id: self.worker_id,
            items: self.items,
            busy: self.busy,
            waiting: self.waiting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_busy_time_spans_handout_to_reentry() {
        let mut token = WorkerToken::new(3);
        assert!(token.is_first_call());
        assert!(!token.enter());
        assert!(!token.is_first_call());

        token.handed_out(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(token.enter());

        let stats = token.stats();
        assert_eq!(stats.worker_id, 3);
        assert_eq!(stats.items, 1);
        assert!(stats.busy >= Duration::from_millis(200), "busy {:?}", stats.busy);
        assert_eq!(stats.waiting, Duration::from_millis(5));
    }
}
