//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::PublishConfig;
use tracing::info;

use crate::cli::InfoArgs;

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let json = config_loader::ConfigLoader::to_json(&config)
            .context("Failed to serialize config info")?;
        println!("{json}");
    } else {
        print_config_info(&config);
    }
    Ok(())
}

fn print_config_info(config: &PublishConfig) {
    let dispatch = &config.dispatch;
    let breaker = &config.circuit_breaker;

    println!("Publish engine configuration ({:?})\n", config.version);

    println!("Dispatch");
    println!("   ├─ Prefetch batch size: {}", dispatch.prefetch_batch_size);
    println!(
        "   ├─ Prefetch threshold: {}{}",
        dispatch.prefetch_threshold(),
        if dispatch.prefetch_threshold.is_none() { " (half the batch)" } else { "" }
    );
    println!("   ├─ Load limit: {}", dispatch.load_limit);
    println!("   ├─ Backpressure poll: {} ms", dispatch.backpressure_poll_ms);
    println!("   └─ Stats report every: {} items", dispatch.stats_report_every);

    println!("\nStats cache");
    println!("   └─ Refresh interval: {} ms", config.stats.refresh_interval_ms);

    println!("\nCircuit breaker");
    if breaker.is_active() {
        println!("   ├─ Max error count: {}", breaker.max_error_count);
        println!("   └─ Retry delay: {} s", breaker.retry_delay_secs);
    } else {
        println!("   └─ Inactive");
    }
    println!();
}
