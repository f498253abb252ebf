//! Error types shared by the coordinator and worker sides
//!
//! Each layer has its own error enum so callers can tell a broken frame from a
//! failed write or a job that never finished. Application glue (`main.rs`,
//! config loading) wraps these in `anyhow::Error` with added context.

use crate::distributed::job::JobId;
use crate::distributed::protocol::RecordKind;
use thiserror::Error;

/// Failure to read or decode one length-prefixed frame
#[derive(Debug, Error)]
pub enum FramingError {
    /// Stream closed before a length prefix could be read
    #[error("stream closed before frame length prefix")]
    Closed,

    /// Stream closed part-way through the payload
    #[error("stream closed before the {expected}-byte payload was complete")]
    Truncated { expected: usize },

    /// Declared payload exceeds the configured limit
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    /// Payload was written with a schema version we do not speak
    #[error("unsupported wire version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// Payload carries a different record than the reader expected
    #[error("expected {expected:?} record, got kind {found}")]
    UnexpectedKind { expected: RecordKind, found: u8 },

    /// Body length does not match the fixed-width schema
    #[error("{kind:?} body must be {expected} bytes, got {found}")]
    BadLength {
        kind: RecordKind,
        expected: usize,
        found: usize,
    },

    #[error("I/O error while framing: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// True when the peer simply went away (clean or mid-frame)
    pub fn is_disconnect(&self) -> bool {
        match self {
            FramingError::Closed | FramingError::Truncated { .. } => true,
            FramingError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Failure on an established worker session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        #[source]
        source: FramingError,
    },

    #[error("worker {peer} declared capacity {capacity}, which is out of range")]
    CapacityOutOfRange { peer: String, capacity: u64 },

    #[error("failed to send sub-task {task_id} to session {session_id}: {source}")]
    Send {
        session_id: u64,
        task_id: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to complete a submitted job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} is not known to the coordinator")]
    UnknownJob(JobId),

    #[error("job {0} is already being awaited")]
    AlreadyAwaited(JobId),

    #[error("job {job_id} timed out with {received} of {expected} results")]
    Timeout {
        job_id: JobId,
        received: usize,
        expected: usize,
    },

    #[error("job {0} was cancelled")]
    Cancelled(JobId),

    #[error("job {job_id} could not be dispatched: {source}")]
    Dispatch {
        job_id: JobId,
        #[source]
        source: SessionError,
    },
}
