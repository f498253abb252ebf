//! TOML configuration file parsing

use super::*;
use crate::config::cli::{AssignmentArg, Cli};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the config file named on the CLI (or defaults) and apply CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Coordinator settings
    if let Some(ref addr) = cli.listen_addr {
        config.coordinator.listen_addr = addr.clone();
    }
    if let Some(ref delay) = cli.settle_delay {
        parse_duration(delay).context("Invalid --settle-delay")?;
        config.coordinator.settle_delay = delay.clone();
    }
    if let Some(ref timeout) = cli.job_timeout {
        parse_duration(timeout).context("Invalid --job-timeout")?;
        config.coordinator.job_timeout = Some(timeout.clone());
    }
    if let Some(policy) = cli.assignment {
        config.coordinator.assignment = match policy {
            AssignmentArg::LargestRemainder => AssignmentPolicy::LargestRemainder,
            AssignmentArg::CeilingQuota => AssignmentPolicy::CeilingQuota,
        };
    }
    if let Some(ref path) = cli.json_output {
        config.coordinator.json_output = Some(path.clone());
    }

    // Worker settings
    if let Some(ref addr) = cli.coordinator_addr {
        config.worker.coordinator_addr = addr.clone();
    }
    if let Some(capacity) = cli.capacity {
        config.worker.capacity = Some(capacity);
    }

    // Frame limit applies to whichever side is running
    if let Some(max) = cli.max_frame_len {
        config.coordinator.max_frame_len = max;
        config.worker.max_frame_len = max;
    }

    Ok(config)
}

/// Parse duration string (e.g., "500ms", "2s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
        let unit_start = s.len() - 1;
        (&s[..unit_start], &s[unit_start..])
    } else {
        // bare number means seconds
        (s, "s")
    };

    let num: u64 = num_str.trim().parse()
        .with_context(|| format!("Invalid number in duration: {}", num_str))?;

    let scale = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => anyhow::bail!("Invalid duration unit: {}. Use ms, s, m, or h", unit),
    };

    match num.checked_mul(scale) {
        Some(seconds) => Ok(Duration::from_secs(seconds)),
        None => anyhow::bail!("Duration too large: {}", s),
    }
}
