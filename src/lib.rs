//! quadrature-grid - distributed numeric integration
//!
//! A coordinator accepts long-lived worker connections, learns each worker's
//! capacity, and splits every integration job into sub-tasks in proportion
//! to the total. Workers integrate their sub-tasks across local threads and
//! stream partial sums back; the coordinator adds them up.
//!
//! # Architecture
//!
//! - **Wire protocol**: length-prefixed, versioned, fixed-width records
//! - **Coordinator**: session registry, job table, capacity-weighted dispatch
//! - **Worker agent**: handshake, then execute-and-reply until disconnected
//! - **Local executor**: per-sub-task fan-out across worker threads

pub mod config;
pub mod distributed;
pub mod error;
pub mod output;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Coordinator, WorkerAgent};

/// Result type used throughout quadrature-grid
pub type Result<T> = anyhow::Result<T>;
