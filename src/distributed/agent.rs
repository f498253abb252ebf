//! Worker agent
//!
//! The agent runs on each worker host. It:
//! - Connects to the coordinator
//! - Receives its session id and answers with its capacity
//! - Executes every sub-task it is sent on the local executor
//! - Writes one result per sub-task, in the order tasks arrived
//!
//! The agent stops when the coordinator closes the connection or sends
//! something that does not decode as a sub-task.

use crate::distributed::protocol::{
    read_record, write_record, CapacityReport, Handshake, SubResult, SubTask,
};
use crate::util::resource::{default_capacity, node_name};
use crate::worker::kernel::{Integrand, InverseLog};
use crate::worker::LocalExecutor;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// What one agent connection accomplished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub session_id: u64,
    pub capacity: usize,
    pub tasks_completed: u64,
}

pub struct WorkerAgent {
    coordinator_addr: String,
    capacity: usize,
    max_frame_len: usize,
    kernel: Arc<dyn Integrand>,
}

impl WorkerAgent {
    /// Create an agent; `None` capacity means "use this host's parallelism"
    pub fn new(coordinator_addr: String, capacity: Option<usize>, max_frame_len: usize) -> Self {
        Self {
            coordinator_addr,
            capacity: capacity.unwrap_or_else(default_capacity).max(1),
            max_frame_len,
            kernel: Arc::new(InverseLog),
        }
    }

    /// Replace the integrand (the default is 1/ln(x))
    pub fn with_kernel(mut self, kernel: Arc<dyn Integrand>) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Connect to the coordinator and serve until it hangs up
    pub async fn run(self) -> Result<AgentSummary> {
        let stream = TcpStream::connect(&self.coordinator_addr)
            .await
            .with_context(|| {
                format!("Failed to connect to coordinator at {}", self.coordinator_addr)
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY to {}: {}", self.coordinator_addr, e);
        }
        info!("Connected to coordinator at {}", self.coordinator_addr);
        self.run_on(stream).await
    }

    /// Serve one coordinator over an already-open stream
    pub async fn run_on<S>(self, stream: S) -> Result<AgentSummary>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let handshake: Handshake = read_record(&mut reader, self.max_frame_len)
            .await
            .context("Failed to read handshake from coordinator")?;
        write_record(
            &mut writer,
            &CapacityReport {
                capacity: self.capacity as u64,
            },
        )
        .await
        .context("Failed to send capacity report")?;

        let session_id = handshake.session_id;
        let host = node_name();
        info!(
            "Worker {} on {} registered with capacity {}",
            session_id, host, self.capacity
        );

        let executor = Arc::new(LocalExecutor::new(self.capacity, Arc::clone(&self.kernel)));
        let mut tasks_completed = 0u64;

        loop {
            let task: SubTask = match read_record(&mut reader, self.max_frame_len).await {
                Ok(task) => task,
                Err(e) if e.is_disconnect() => {
                    info!("Worker {}: coordinator closed the connection", session_id);
                    break;
                }
                Err(e) => {
                    warn!("Worker {}: stopping on bad frame: {}", session_id, e);
                    break;
                }
            };

            debug!(
                "Worker {}: sub-task {} [{}, {}) step {}",
                session_id, task.id, task.lower, task.upper, task.step
            );

            let exec = Arc::clone(&executor);
            let value = tokio::task::spawn_blocking(move || exec.run(&task))
                .await
                .context("Executor task failed")??;

            if let Err(e) = write_record(&mut writer, &SubResult { id: task.id, value }).await {
                warn!("Worker {}: failed to send result {}: {}", session_id, task.id, e);
                break;
            }
            tasks_completed += 1;
            info!(
                "Worker {} on {}: sub-task {} = {}",
                session_id, host, task.id, value
            );
        }

        Ok(AgentSummary {
            session_id,
            capacity: self.capacity,
            tasks_completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::DEFAULT_MAX_FRAME_LEN;
    use crate::worker::kernel::midpoint;

    #[test]
    fn test_explicit_capacity_used() {
        let agent = WorkerAgent::new("127.0.0.1:1".into(), Some(3), DEFAULT_MAX_FRAME_LEN);
        assert_eq!(agent.capacity(), 3);

        let agent = WorkerAgent::new("127.0.0.1:1".into(), Some(0), DEFAULT_MAX_FRAME_LEN);
        assert_eq!(agent.capacity(), 1);

        let agent = WorkerAgent::new("127.0.0.1:1".into(), None, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(agent.capacity(), default_capacity());
    }

    #[tokio::test]
    async fn test_serves_tasks_in_order_until_close() {
        let (agent_end, mut coord) = tokio::io::duplex(64 * 1024);
        let agent = WorkerAgent::new(String::new(), Some(2), DEFAULT_MAX_FRAME_LEN);
        let running = tokio::spawn(agent.run_on(agent_end));

        write_record(&mut coord, &Handshake { session_id: 4 }).await.unwrap();
        let report: CapacityReport = read_record(&mut coord, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(report.capacity, 2);

        let tasks = [
            SubTask { id: 10, lower: 2.0, upper: 3.0, step: 0.01 },
            SubTask { id: 11, lower: 3.0, upper: 4.0, step: 0.01 },
        ];
        for task in &tasks {
            write_record(&mut coord, task).await.unwrap();
        }
        for task in &tasks {
            let result: SubResult = read_record(&mut coord, DEFAULT_MAX_FRAME_LEN).await.unwrap();
            assert_eq!(result.id, task.id);
            let expected = midpoint(&InverseLog, task.lower, task.upper, task.step);
            assert!((result.value - expected).abs() < 1e-9);
        }
        drop(coord);

        let summary = running.await.unwrap().unwrap();
        assert_eq!(
            summary,
            AgentSummary { session_id: 4, capacity: 2, tasks_completed: 2 }
        );
    }

    #[tokio::test]
    async fn test_custom_kernel() {
        let (agent_end, mut coord) = tokio::io::duplex(4096);
        let agent = WorkerAgent::new(String::new(), Some(1), DEFAULT_MAX_FRAME_LEN)
            .with_kernel(Arc::new(|_x: f64| 1.0));
        let running = tokio::spawn(agent.run_on(agent_end));

        write_record(&mut coord, &Handshake { session_id: 1 }).await.unwrap();
        let _: CapacityReport = read_record(&mut coord, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        write_record(&mut coord, &SubTask { id: 0, lower: 0.0, upper: 5.0, step: 0.5 })
            .await
            .unwrap();
        let result: SubResult = read_record(&mut coord, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert!((result.value - 5.0).abs() < 1e-9);

        drop(coord);
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stops_on_bad_frame() {
        let (agent_end, mut coord) = tokio::io::duplex(4096);
        let agent = WorkerAgent::new(String::new(), Some(1), DEFAULT_MAX_FRAME_LEN);
        let running = tokio::spawn(agent.run_on(agent_end));

        write_record(&mut coord, &Handshake { session_id: 2 }).await.unwrap();
        let _: CapacityReport = read_record(&mut coord, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        write_record(&mut coord, &Handshake { session_id: 3 }).await.unwrap();

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.tasks_completed, 0);
    }

    #[tokio::test]
    async fn test_missing_handshake_is_error() {
        let (agent_end, coord) = tokio::io::duplex(4096);
        drop(coord);
        let agent = WorkerAgent::new(String::new(), Some(1), DEFAULT_MAX_FRAME_LEN);
        assert!(agent.run_on(agent_end).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let agent = WorkerAgent::new(addr, Some(1), DEFAULT_MAX_FRAME_LEN);
        assert!(agent.run().await.is_err());
    }
}
