//! Simulation statistics and summary output.

use std::time::Duration;

use dispatcher::{MetricsSnapshot, RunReport};
use observability::WorkerSummary;
use serde::Serialize;
use stats_cache::PublishCounts;

/// Render an error and its sources as `outer: inner: ...`
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Statistics from a simulation run
#[derive(Debug, Clone)]
pub struct SimulationStats {
    pub duration: Duration,
    /// Items rendered by workers
    pub rendered: u64,
    /// Rendered items not written because their target was disabled
    pub suppressed: u64,
    pub prepared_batches: u64,
    pub keep_alive_touches: u64,
    /// Stopped by a shutdown signal
    pub interrupted: bool,
    pub report: RunReport,
    pub worker_summary: WorkerSummary,
    pub page_counts: PublishCounts,
    pub disabled_targets: Vec<String>,
}

/// Machine-readable summary
#[derive(Debug, Serialize)]
pub struct SummaryJson<'a> {
    duration_ms: u128,
    dispatch: MetricsSnapshot,
    rendered: u64,
    suppressed: u64,
    remaining: usize,
    queue_full_wait_ms: u128,
    per_target: Vec<(&'a str, u64)>,
    pages: PublishCounts,
    disabled_targets: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    abort_cause: Option<String>,
}

impl SimulationStats {
    /// Items rendered per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.rendered as f64 / secs
        } else {
            0.0
        }
    }

    pub fn to_json(&self) -> SummaryJson<'_> {
        SummaryJson {
            duration_ms: self.duration.as_millis(),
            dispatch: self.report.metrics,
            rendered: self.rendered,
            suppressed: self.suppressed,
            remaining: self.report.remaining,
            queue_full_wait_ms: self.report.queue_full_wait.as_millis(),
            per_target: self
                .report
                .published_per_target
                .iter()
                .map(|(target, count)| (target.as_str(), *count))
                .collect(),
            pages: self.page_counts,
            disabled_targets: &self.disabled_targets,
            abort_cause: self.report.abort_cause.as_ref().map(|cause| error_chain(&**cause)),
        }
    }

    pub fn print_summary(&self) {
        let metrics = &self.report.metrics;

        println!("\n=== Publish Run Summary ===\n");
        println!("Overview");
        println!("  Duration:          {:.2}s", self.duration.as_secs_f64());
        println!("  Issued:            {}", metrics.issued_count);
        println!("  Skipped:           {}", metrics.skipped_count);
        println!("  Rendered:          {} ({:.1}/s)", self.rendered, self.throughput());
        println!("  Suppressed:        {}", self.suppressed);
        println!("  Left in queue:     {}", self.report.remaining);
        println!(
            "  Prefetch batches:  {} (index {}, preparer saw {})",
            metrics.prefetch_batches, self.report.prefetch_index, self.prepared_batches
        );
        println!(
            "  Queue-full wait:   {:.2}s",
            self.report.queue_full_wait.as_secs_f64()
        );
        println!("  Keep-alive:        {} touches", self.keep_alive_touches);

        println!("\nPer target");
        for (target, count) in &self.report.published_per_target {
            println!("  {target}: {count}");
        }

        let pages = &self.page_counts;
        println!(
            "\nPages: {} to publish, {} published, {} remaining, {} delayed",
            pages.to_publish, pages.published, pages.remaining, pages.delayed
        );

        if !self.disabled_targets.is_empty() {
            println!("\nDisabled targets: {}", self.disabled_targets.join(", "));
        }

        println!("\n{}", self.worker_summary);

        if let Some(cause) = &self.report.abort_cause {
            println!("Run aborted: {}", error_chain(&**cause));
        } else if self.interrupted {
            println!("Run interrupted before the queue drained");
        }
    }
}
