//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    prefetch_batch_size: usize,
    prefetch_threshold: usize,
    load_limit: f64,
    refresh_interval_ms: u64,
    breaker_active: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            error: Some(format!("File not found: {config_path}")),
            config_path,
            warnings: Vec::new(),
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: config_loader::collect_warnings(&config),
            summary: Some(ConfigSummary {
                version: format!("{:?}", config.version),
                prefetch_batch_size: config.dispatch.prefetch_batch_size,
                prefetch_threshold: config.dispatch.prefetch_threshold(),
                load_limit: config.dispatch.load_limit,
                refresh_interval_ms: config.stats.refresh_interval_ms,
                breaker_active: config.circuit_breaker.is_active(),
            }),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: Vec::new(),
            summary: None,
        },
    }
}

fn print_validation_result(result: &ValidationResult) {
    if !result.valid {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(error) = &result.error {
            println!("\n  Error: {error}");
        }
        return;
    }

    println!("✓ Configuration is valid: {}", result.config_path);
    if let Some(summary) = &result.summary {
        println!("\n  Version: {}", summary.version);
        println!(
            "  Prefetch: batch {} / threshold {}",
            summary.prefetch_batch_size, summary.prefetch_threshold
        );
        println!("  Load limit: {}", summary.load_limit);
        println!("  Stats refresh: {} ms", summary.refresh_interval_ms);
        println!(
            "  Circuit breaker: {}",
            if summary.breaker_active { "active" } else { "inactive" }
        );
    }

    if !result.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &result.warnings {
            println!("  - {warning}");
        }
    }
}
