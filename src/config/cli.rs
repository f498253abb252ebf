//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode - accept workers and run integration jobs
    Coordinator,
    /// Worker mode - connect to a coordinator and execute sub-tasks
    Worker,
}

/// Sub-task assignment policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AssignmentArg {
    /// Floor shares, leftovers to the largest remainders
    LargestRemainder,
    /// Ceiling shares with a shared cursor (later sessions may get nothing)
    CeilingQuota,
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// quadrature-grid - spread numeric integration across connected workers
#[derive(Parser, Debug)]
#[command(name = "quadrature-grid")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator or worker
    #[arg(long, value_enum)]
    pub mode: ExecutionMode,

    /// TOML configuration file (CLI flags take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level (overrides RUST_LOG)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    // === Coordinator Options ===
    /// Address to listen on for workers (e.g., 0.0.0.0:12345)
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Wait before the first job so workers can connect (e.g., 2s, 500ms)
    #[arg(long)]
    pub settle_delay: Option<String>,

    /// Give up on a job after this long (e.g., 30s, 5m)
    #[arg(long)]
    pub job_timeout: Option<String>,

    /// How sub-tasks are spread across workers
    #[arg(long, value_enum)]
    pub assignment: Option<AssignmentArg>,

    /// Lower bound of a single non-interactive job
    #[arg(long, requires_all = ["upper", "step"], allow_negative_numbers = true)]
    pub lower: Option<f64>,

    /// Upper bound of a single non-interactive job
    #[arg(long, requires_all = ["lower", "step"], allow_negative_numbers = true)]
    pub upper: Option<f64>,

    /// Step width of a single non-interactive job
    #[arg(long, requires_all = ["lower", "upper"], allow_negative_numbers = true)]
    pub step: Option<f64>,

    /// Write a JSON report for each job to this path
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    // === Worker Options ===
    /// Coordinator address to connect to (e.g., 10.0.1.10:12345)
    #[arg(long, env = "QUADRATURE_GRID_COORDINATOR")]
    pub coordinator_addr: Option<String>,

    /// Declared capacity (defaults to hardware parallelism)
    #[arg(long)]
    pub capacity: Option<usize>,

    // === Shared Options ===
    /// Largest accepted frame payload in bytes
    #[arg(long)]
    pub max_frame_len: Option<usize>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Bounds for a single job, if all three were given
    pub fn single_job(&self) -> Option<(f64, f64, f64)> {
        match (self.lower, self.upper, self.step) {
            (Some(lower), Some(upper), Some(step)) => Some((lower, upper, step)),
            _ => None,
        }
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == ExecutionMode::Worker {
            if self.single_job().is_some() {
                anyhow::bail!("--lower/--upper/--step only apply in coordinator mode");
            }
            if self.json_output.is_some() {
                anyhow::bail!("--json-output only applies in coordinator mode");
            }
        }

        if self.mode == ExecutionMode::Coordinator && self.capacity.is_some() {
            anyhow::bail!("--capacity only applies in worker mode");
        }

        if let Some((lower, upper, step)) = self.single_job() {
            if !lower.is_finite() || !upper.is_finite() || !step.is_finite() {
                anyhow::bail!("job bounds and step must be finite numbers");
            }
        }

        Ok(())
    }
}
