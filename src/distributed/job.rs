//! Per-job aggregation state
//!
//! Jobs live in a table keyed by `JobId`, and every dispatched sub-task id is
//! mapped back to the job (and session) it belongs to. Results can therefore
//! arrive from any session in any order, and for any number of concurrent
//! jobs, and still land in the right place.
//!
//! A job completes once `received >= expected`. At that point the sum over
//! its result map is computed exactly once and sent to the waiter through a
//! oneshot channel.

use crate::distributed::protocol::SubResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Identifier for one submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened to a reported sub-result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultOutcome {
    /// Recorded; the job still waits for more
    Pending { job_id: JobId, received: usize, expected: usize },
    /// Recorded and the job is now complete with this value
    Completed { job_id: JobId, value: f64 },
    /// No in-flight job owns this task id (late, duplicate, or abandoned)
    Unknown,
}

/// Sub-task that was dispatched but whose session went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanedTask {
    pub job_id: JobId,
    pub task_id: u64,
}

struct JobState {
    expected: usize,
    results: BTreeMap<u64, f64>,
    value: Option<f64>,
    done_tx: Option<oneshot::Sender<f64>>,
    done_rx: Option<oneshot::Receiver<f64>>,
    cancel: CancellationToken,
}

impl JobState {
    fn received(&self) -> usize {
        self.results.len()
    }

    /// Sum in task-id order so the value does not depend on arrival order
    fn finish(&mut self) -> f64 {
        let value: f64 = self.results.values().sum();
        self.value = Some(value);
        if let Some(tx) = self.done_tx.take() {
            // waiter may already have given up; the value is still recorded
            let _ = tx.send(value);
        }
        value
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobState>,
    /// task id -> (owning job, session it was sent to)
    owners: HashMap<u64, (JobId, u64)>,
}

/// Table of in-flight jobs
#[derive(Default)]
pub struct JobTable {
    inner: Mutex<Inner>,
}

/// Everything a caller needs to wait on one job
pub struct JobWaiter {
    pub job_id: JobId,
    pub done: oneshot::Receiver<f64>,
    pub cancel: CancellationToken,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job expecting `expected` results
    ///
    /// A job expecting nothing is complete immediately with value 0.0.
    pub fn open(&self, job_id: JobId, expected: usize, cancel: CancellationToken) {
        let (tx, rx) = oneshot::channel();
        let mut state = JobState {
            expected,
            results: BTreeMap::new(),
            value: None,
            done_tx: Some(tx),
            done_rx: Some(rx),
            cancel,
        };
        if expected == 0 {
            state.finish();
        }
        self.inner.lock().jobs.insert(job_id, state);
    }

    /// Record that `task_id` was sent to `session_id` on behalf of `job_id`
    pub fn track_task(&self, job_id: JobId, task_id: u64, session_id: u64) {
        self.inner.lock().owners.insert(task_id, (job_id, session_id));
    }

    /// Fold one sub-result into its job
    pub fn record(&self, result: SubResult) -> ResultOutcome {
        let mut inner = self.inner.lock();
        let Some((job_id, _)) = inner.owners.remove(&result.id) else {
            return ResultOutcome::Unknown;
        };
        let Some(state) = inner.jobs.get_mut(&job_id) else {
            return ResultOutcome::Unknown;
        };
        if state.value.is_some() {
            return ResultOutcome::Unknown;
        }

        state.results.insert(result.id, result.value);
        if state.received() >= state.expected {
            let value = state.finish();
            ResultOutcome::Completed { job_id, value }
        } else {
            ResultOutcome::Pending {
                job_id,
                received: state.received(),
                expected: state.expected,
            }
        }
    }

    /// Hand out the completion channel for a job (only once)
    pub fn take_waiter(&self, job_id: JobId) -> Option<Result<JobWaiter, ()>> {
        let mut inner = self.inner.lock();
        let state = inner.jobs.get_mut(&job_id)?;
        Some(match state.done_rx.take() {
            Some(done) => Ok(JobWaiter {
                job_id,
                done,
                cancel: state.cancel.clone(),
            }),
            None => Err(()),
        })
    }

    /// `(received, expected)` for a job still in the table
    pub fn progress(&self, job_id: JobId) -> Option<(usize, usize)> {
        let inner = self.inner.lock();
        inner
            .jobs
            .get(&job_id)
            .map(|s| (s.received(), s.expected))
    }

    /// Cancel a job's token; the waiter resolves as cancelled
    pub fn cancel(&self, job_id: JobId) -> bool {
        let inner = self.inner.lock();
        match inner.jobs.get(&job_id) {
            Some(state) => {
                state.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a job and any task ids still pointing at it
    pub fn close(&self, job_id: JobId) {
        let mut inner = self.inner.lock();
        inner.jobs.remove(&job_id);
        inner.owners.retain(|_, (owner, _)| *owner != job_id);
    }

    /// Outstanding tasks that were sent to `session_id`
    pub fn orphaned_by(&self, session_id: u64) -> Vec<OrphanedTask> {
        let inner = self.inner.lock();
        let mut orphans: Vec<OrphanedTask> = inner
            .owners
            .iter()
            .filter(|(_, (_, owner_session))| *owner_session == session_id)
            .map(|(&task_id, &(job_id, _))| OrphanedTask { job_id, task_id })
            .collect();
        orphans.sort_by_key(|o| o.task_id);
        orphans
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
