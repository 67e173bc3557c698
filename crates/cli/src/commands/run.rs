//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::PublishConfig;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{Simulation, SimulationConfig};

/// Execute the `run` command
pub async fn run_simulation(args: &RunArgs) -> Result<()> {
    let publish = load_config(args)?;
    for warning in config_loader::collect_warnings(&publish) {
        warn!(%warning, "Configuration warning");
    }

    let config = SimulationConfig {
        publish,
        items: args.items,
        workers: args.workers,
        targets: args.targets,
        render_time: Duration::from_millis(args.render_ms),
        write_time: Duration::from_millis(args.write_ms),
        writer_capacity: args.writer_capacity.max(1),
        fail_every: args.fail_every,
        flaky_target: args.flaky_target.clone(),
        abort_after: args.abort_after,
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    };

    let stats = Simulation::new(config)
        .run(shutdown_signal())
        .await
        .context("Simulation failed")?;

    info!(
        issued = stats.report.metrics.issued_count,
        skipped = stats.report.metrics.skipped_count,
        duration_secs = stats.duration.as_secs_f64(),
        aborted = stats.report.is_aborted(),
        "Publish run finished"
    );

    if args.json {
        let json = serde_json::to_string_pretty(&stats.to_json())
            .context("Failed to serialize run summary")?;
        println!("{json}");
    } else {
        stats.print_summary();
    }
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<PublishConfig> {
    let Some(path) = &args.config else {
        info!("No configuration file given, using defaults");
        return Ok(PublishConfig::default());
    };
    info!(config = %path.display(), "Loading configuration");

    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
