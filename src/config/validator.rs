//! Configuration validation

use super::*;
use crate::distributed::session::MAX_DECLARED_CAPACITY;
use anyhow::{Context, Result};
use std::net::SocketAddr;

/// Smallest frame limit that still fits every record
const MIN_FRAME_LEN: usize = 64;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_coordinator(&config.coordinator)?;
    validate_worker(&config.worker)?;
    Ok(())
}

/// Validate coordinator configuration
pub fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<()> {
    coordinator
        .listen_addr
        .parse::<SocketAddr>()
        .with_context(|| {
            format!("listen_addr '{}' is not a socket address", coordinator.listen_addr)
        })?;

    coordinator
        .settle_delay()
        .context("settle_delay is not a valid duration")?;

    let job_timeout = coordinator
        .job_timeout()
        .context("job_timeout is not a valid duration")?;
    if let Some(timeout) = job_timeout {
        if timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }
    }

    validate_frame_len(coordinator.max_frame_len)?;

    if let Some(ref path) = coordinator.json_output {
        if path.as_os_str().is_empty() {
            anyhow::bail!("json_output must not be an empty path");
        }
        if path.is_dir() {
            anyhow::bail!("json_output {} is a directory", path.display());
        }
    }

    Ok(())
}

/// Validate worker configuration
pub fn validate_worker(worker: &WorkerConfig) -> Result<()> {
    if worker.coordinator_addr.trim().is_empty() {
        anyhow::bail!("coordinator_addr must not be empty");
    }
    // host:port, host may be a name
    match worker.coordinator_addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse::<u16>().with_context(|| {
                format!("coordinator_addr '{}' has an invalid port", worker.coordinator_addr)
            })?;
        }
        _ => anyhow::bail!(
            "coordinator_addr '{}' must be host:port",
            worker.coordinator_addr
        ),
    }

    if let Some(capacity) = worker.capacity {
        if capacity == 0 || capacity as u64 > MAX_DECLARED_CAPACITY {
            anyhow::bail!(
                "worker capacity must be between 1 and {}, got {}",
                MAX_DECLARED_CAPACITY,
                capacity
            );
        }
    }

    validate_frame_len(worker.max_frame_len)
}

fn validate_frame_len(max_frame_len: usize) -> Result<()> {
    if max_frame_len < MIN_FRAME_LEN {
        anyhow::bail!(
            "max_frame_len must be at least {} bytes, got {}",
            MIN_FRAME_LEN,
            max_frame_len
        );
    }
    if max_frame_len > u32::MAX as usize {
        anyhow::bail!("max_frame_len must fit in a 32-bit length prefix");
    }
    Ok(())
}
