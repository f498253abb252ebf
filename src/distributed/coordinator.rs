//! Job coordinator
//!
//! The coordinator:
//! - Accepts worker connections and registers them as sessions
//! - Partitions each job into one sub-task per unit of aggregate capacity
//! - Assigns sub-tasks to sessions in proportion to their capacity
//! - Aggregates results as they arrive, for any number of in-flight jobs
//! - Resolves each job with its value, a timeout, or a cancellation
//!
//! A session that disconnects mid-job is removed from the registry; its
//! outstanding sub-tasks are logged as orphaned and never retried. Only the
//! job deadline (if configured) stops a caller from waiting on them forever.

use crate::distributed::job::{JobId, JobTable, ResultOutcome};
use crate::distributed::partition::{assign, partition, AssignmentPolicy};
use crate::distributed::protocol::{SubResult, DEFAULT_MAX_FRAME_LEN};
use crate::distributed::registry::{SessionEvent, SessionRegistry};
use crate::distributed::session::{ResultCallback, SessionExit};
use crate::error::JobError;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub policy: AssignmentPolicy,
    /// How long `await_job` waits before giving up; `None` waits forever
    pub job_timeout: Option<Duration>,
    pub max_frame_len: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            policy: AssignmentPolicy::default(),
            job_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Bounds and step of one requested job
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JobParams {
    pub lower: f64,
    pub upper: f64,
    pub step: f64,
}

/// Sub-tasks one session received for a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionShare {
    pub session_id: u64,
    pub capacity: usize,
    pub task_ids: Vec<u64>,
    /// Covered interval, absent when the session received nothing
    pub interval: Option<(f64, f64)>,
}

/// What `submit_job` dispatched
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    pub params: JobParams,
    pub total_capacity: usize,
    pub shares: Vec<SessionShare>,
}

impl Submission {
    pub fn task_count(&self) -> usize {
        self.shares.iter().map(|s| s.task_ids.len()).sum()
    }
}

pub struct Coordinator {
    registry: Arc<SessionRegistry>,
    jobs: Arc<JobTable>,
    settings: CoordinatorSettings,
    next_job_id: AtomicU64,
    next_task_id: AtomicU64,
    shutdown: CancellationToken,
    events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    /// Sub-tasks stranded by disconnected sessions
    orphaned: Arc<AtomicU64>,
}

impl Coordinator {
    pub fn new(settings: CoordinatorSettings) -> Arc<Self> {
        let (registry, events) = SessionRegistry::new(settings.max_frame_len);
        Arc::new(Self {
            registry,
            jobs: Arc::new(JobTable::new()),
            settings,
            next_job_id: AtomicU64::new(1),
            next_task_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            events: Mutex::new(Some(events)),
            orphaned: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept workers until `shutdown` is called
    ///
    /// Each connection is handshaken on its own task so a slow worker does
    /// not hold up the accept loop. Handshake failures are logged and the
    /// connection dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!("Coordinator listening on {}", local);

        if let Some(events) = self.events.lock().take() {
            tokio::spawn(supervise(
                Arc::clone(&self.jobs),
                Arc::clone(&self.orphaned),
                events,
            ));
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Coordinator stopped accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(async move {
                            if let Err(e) = registry.register(stream, addr.to_string()).await {
                                error!("Dropping connection from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        }

        Ok(())
    }

    /// Sub-tasks left unanswered by sessions that disconnected mid-job
    pub fn orphaned_count(&self) -> u64 {
        self.orphaned.load(Ordering::SeqCst)
    }

    /// Stop accepting workers and cancel every in-flight job
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Partition a job, dispatch it, and return without waiting
    ///
    /// With no sessions (or zero aggregate capacity) the job is registered as
    /// already complete with value 0.0.
    pub async fn submit_job(&self, params: JobParams) -> Result<Submission, JobError> {
        let job_id = JobId(self.next_job_id.fetch_add(1, Ordering::SeqCst));
        let snapshot = self.registry.snapshot();
        let total_capacity: usize = snapshot.iter().map(|s| s.capacity()).sum();

        info!(
            "Job {}: [{}, {}) step {} across {} sessions (capacity {})",
            job_id,
            params.lower,
            params.upper,
            params.step,
            snapshot.len(),
            total_capacity
        );

        if total_capacity == 0 {
            warn!("Job {}: no worker capacity connected, resolving to 0", job_id);
        }

        let tasks = partition(params.lower, params.upper, params.step, total_capacity);
        let capacities: Vec<(u64, usize)> = snapshot
            .iter()
            .map(|s| (s.id(), s.capacity()))
            .collect();
        let assignments = assign(&capacities, tasks.len(), self.settings.policy);

        let cancel = self.shutdown.child_token();
        self.jobs.open(job_id, tasks.len(), cancel);

        let callback = self.result_callback();
        for session in &snapshot {
            session.set_result_callback(Arc::clone(&callback));
        }

        let mut shares = Vec::with_capacity(assignments.len());
        for (session, assignment) in snapshot.iter().zip(&assignments) {
            info!(
                "Job {}: session {} gets {} sub-tasks (capacity {})",
                job_id,
                session.id(),
                assignment.tasks.len(),
                session.capacity()
            );

            let mut task_ids = Vec::with_capacity(assignment.tasks.len());
            for local in assignment.tasks.clone() {
                let mut task = tasks[local];
                task.id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
                self.jobs.track_task(job_id, task.id, session.id());

                if let Err(source) = session.send_task(&task).await {
                    error!("Job {}: {}", job_id, source);
                    self.jobs.close(job_id);
                    return Err(JobError::Dispatch { job_id, source });
                }
                task_ids.push(task.id);
            }

            let interval = (!assignment.tasks.is_empty()).then(|| {
                (
                    tasks[assignment.tasks.start].lower,
                    tasks[assignment.tasks.end - 1].upper,
                )
            });
            shares.push(SessionShare {
                session_id: session.id(),
                capacity: session.capacity(),
                task_ids,
                interval,
            });
        }

        Ok(Submission {
            job_id,
            params,
            total_capacity,
            shares,
        })
    }

    /// Wait for a submitted job to finish
    ///
    /// Resolves with the aggregated value, or with `Timeout` / `Cancelled`.
    /// The job is removed from the table either way.
    pub async fn await_job(&self, job_id: JobId) -> Result<f64, JobError> {
        let waiter = match self.jobs.take_waiter(job_id) {
            None => return Err(JobError::UnknownJob(job_id)),
            Some(Err(())) => return Err(JobError::AlreadyAwaited(job_id)),
            Some(Ok(waiter)) => waiter,
        };

        let deadline = self.settings.job_timeout;
        let expire = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            done = waiter.done => done.map_err(|_| JobError::Cancelled(job_id)),
            _ = waiter.cancel.cancelled() => Err(JobError::Cancelled(job_id)),
            _ = expire => {
                let (received, expected) = self.jobs.progress(job_id).unwrap_or((0, 0));
                Err(JobError::Timeout { job_id, received, expected })
            }
        };

        self.jobs.close(job_id);
        match &outcome {
            Ok(value) => info!("Job {} complete: {}", job_id, value),
            Err(e) => warn!("{}", e),
        }
        outcome
    }

    /// Submit and wait in one call
    pub async fn handle_job(&self, lower: f64, upper: f64, step: f64) -> Result<f64, JobError> {
        let submission = self.submit_job(JobParams { lower, upper, step }).await?;
        self.await_job(submission.job_id).await
    }

    /// Cancel one in-flight job; returns false if it is unknown
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        self.jobs.cancel(job_id)
    }

    /// Fold one sub-result into its job
    pub fn handle_result(&self, result: SubResult) {
        record_result(&self.jobs, result);
    }

    fn result_callback(&self) -> ResultCallback {
        let jobs = Arc::clone(&self.jobs);
        Arc::new(move |result| record_result(&jobs, result))
    }
}

fn record_result(jobs: &JobTable, result: SubResult) {
    match jobs.record(result) {
        ResultOutcome::Pending {
            job_id,
            received,
            expected,
        } => info!(
            "Job {}: result for sub-task {} ({}/{})",
            job_id, result.id, received, expected
        ),
        ResultOutcome::Completed { job_id, value } => {
            info!("Job {}: all results received, total {}", job_id, value)
        }
        ResultOutcome::Unknown => warn!(
            "Discarding result for sub-task {} with no in-flight job",
            result.id
        ),
    }
}

/// Log session lifecycle and any work stranded by a disconnect
async fn supervise(
    jobs: Arc<JobTable>,
    orphaned: Arc<AtomicU64>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Registered { .. } => {}
            SessionEvent::Disconnected { id, exit } => {
                match exit {
                    SessionExit::Closed => info!("Session {} disconnected", id),
                    SessionExit::Failed(e) => {
                        warn!("Session {} dropped after bad frame: {}", id, e)
                    }
                    SessionExit::Panicked(e) => {
                        error!("Session {} read loop panicked: {}", id, e)
                    }
                }
                let orphans = jobs.orphaned_by(id);
                if !orphans.is_empty() {
                    orphaned.fetch_add(orphans.len() as u64, Ordering::SeqCst);
                    let ids: Vec<String> = orphans
                        .iter()
                        .map(|o| format!("{}@{}", o.task_id, o.job_id))
                        .collect();
                    warn!(
                        "Session {} left {} sub-tasks unanswered: {}",
                        id,
                        orphans.len(),
                        ids.join(", ")
                    );
                }
            }
        }
    }
}
