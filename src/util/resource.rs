//! Host resource discovery
//!
//! Worker capacity defaults to the number of logical CPUs. Both sides use
//! the same lookup: the worker when it declares its capacity, the
//! coordinator when a worker declares zero.

use log::warn;
use std::fs;

/// Number of logical CPUs on this host
///
/// Reads from /proc/cpuinfo or uses the num_cpus crate as fallback.
/// Returns None if unable to determine.
pub fn hardware_parallelism() -> Option<usize> {
    if let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") {
        let count = cpuinfo
            .lines()
            .filter(|line| line.starts_with("processor"))
            .count();
        if count > 0 {
            return Some(count);
        }
    }

    match num_cpus::get() {
        0 => None,
        n => Some(n),
    }
}

/// Hardware parallelism, or 1 (with a warning) when it cannot be determined
pub fn default_capacity() -> usize {
    match hardware_parallelism() {
        Some(n) => n,
        None => {
            warn!("Could not determine CPU count, using capacity 1");
            1
        }
    }
}

/// Host name for logs and reports
pub fn node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
