//! Distributed mode implementation
//!
//! # Architecture
//!
//! quadrature-grid uses a coordinator-worker architecture:
//!
//! - **Coordinator**: Accepts workers, partitions jobs, aggregates results
//! - **Worker agent**: Connects to the coordinator, reports capacity, executes sub-tasks
//! - **Local executor**: Threads on the worker splitting each sub-task further
//!
//! # Modules
//!
//! - `protocol`: Wire records and length-prefixed framing
//! - `session`: Coordinator-side view of one worker connection
//! - `registry`: Live sessions keyed by id
//! - `partition`: Job splitting and capacity-weighted assignment
//! - `job`: Per-job aggregation state
//! - `coordinator`: Job submission, dispatch, and completion
//! - `agent`: Worker side of the protocol

pub mod agent;
pub mod coordinator;
pub mod job;
pub mod partition;
pub mod protocol;
pub mod registry;
pub mod session;

// Re-export key types
pub use agent::{AgentSummary, WorkerAgent};
pub use coordinator::{Coordinator, CoordinatorSettings, JobParams, SessionShare, Submission};
pub use job::JobId;
pub use partition::AssignmentPolicy;
pub use protocol::{
    CapacityReport, Handshake, SubResult, SubTask, DEFAULT_MAX_FRAME_LEN, PROTOCOL_VERSION,
};
pub use registry::{SessionEvent, SessionRegistry};
pub use session::WorkerSession;
