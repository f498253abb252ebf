//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::distributed::partition::AssignmentPolicy;
use crate::distributed::protocol::DEFAULT_MAX_FRAME_LEN;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Coordinator-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Address the coordinator listens on for workers
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Wait before the first job so workers can connect (e.g. "2s", "500ms")
    #[serde(default = "default_settle_delay")]
    pub settle_delay: String,
    /// Give up on a job after this long; unset waits forever
    #[serde(default)]
    pub job_timeout: Option<String>,
    /// How sub-tasks are spread across sessions
    #[serde(default)]
    pub assignment: AssignmentPolicy,
    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Write a JSON report per job to this path
    #[serde(default)]
    pub json_output: Option<PathBuf>,
}

/// Worker-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Coordinator to connect to
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,
    /// Declared capacity; unset uses the host's hardware parallelism
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:12345".to_string()
}

fn default_coordinator_addr() -> String {
    "127.0.0.1:12345".to_string()
}

fn default_settle_delay() -> String {
    "2s".to_string()
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            settle_delay: default_settle_delay(),
            job_timeout: None,
            assignment: AssignmentPolicy::default(),
            max_frame_len: default_max_frame_len(),
            json_output: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn settle_delay(&self) -> Result<Duration> {
        self::toml::parse_duration(&self.settle_delay)
    }

    pub fn job_timeout(&self) -> Result<Option<Duration>> {
        self.job_timeout
            .as_deref()
            .map(self::toml::parse_duration)
            .transpose()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: default_coordinator_addr(),
            capacity: None,
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl fmt::Display for AssignmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentPolicy::LargestRemainder => write!(f, "largest-remainder"),
            AssignmentPolicy::CeilingQuota => write!(f, "ceiling-quota"),
        }
    }
}
