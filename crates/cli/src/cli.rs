//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Publish simulator - drive the work distribution engine with in-memory collaborators
#[derive(Parser, Debug)]
#[command(
    name = "publish-sim",
    author,
    version,
    about = "Publish work distribution simulator",
    long_about = "Runs the publish work distribution engine against in-memory \n\
                  collaborators: a dependency store, resolvers, bounded target \n\
                  writers and a queue-count source."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "PUBLISH_SIM_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "PUBLISH_SIM_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Simulate a publish run
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display effective configuration
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "PUBLISH_SIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of work items to publish
    #[arg(long, default_value = "1000")]
    pub items: u64,

    /// Number of rendering workers
    #[arg(long, default_value = "8")]
    pub workers: usize,

    /// Number of publish targets
    #[arg(long, default_value = "3")]
    pub targets: usize,

    /// Simulated render time per item (milliseconds)
    #[arg(long, default_value = "5")]
    pub render_ms: u64,

    /// Simulated write time per item (milliseconds)
    #[arg(long, default_value = "10")]
    pub write_ms: u64,

    /// Writer queue capacity per target
    #[arg(long, default_value = "16")]
    pub writer_capacity: usize,

    /// Every N-th item fails to resolve (0 = never)
    #[arg(long, default_value = "0")]
    pub fail_every: u64,

    /// Target whose writes always fail (exercises the circuit breaker)
    #[arg(long)]
    pub flaky_target: Option<String>,

    /// Abort the run after this many handed-out items
    #[arg(long)]
    pub abort_after: Option<u64>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "PUBLISH_SIM_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "publish.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "publish.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["publish-sim", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.config.is_none());
        assert_eq!(args.items, 1000);
        assert_eq!(args.workers, 8);
        assert_eq!(args.fail_every, 0);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["publish-sim", "-q", "-v", "info"]).is_err());
    }
}
