//! Coordinator-side worker session
//!
//! A session owns one worker connection. Construction performs the handshake
//! (send id, receive capacity). After that the read half belongs to a
//! dedicated read loop that forwards every `SubResult` to the installed
//! callback. The write half sits behind an async mutex, so concurrent
//! dispatchers never interleave frames.

use crate::distributed::protocol::{
    read_record, write_record, CapacityReport, Handshake, SubResult, SubTask,
};
use crate::error::{FramingError, SessionError};
use crate::util::resource::default_capacity;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Upper bound on a declared capacity
///
/// Partitioning allocates one sub-task per unit of capacity, so a bogus
/// report must not be able to exhaust coordinator memory.
pub const MAX_DECLARED_CAPACITY: u64 = 65_536;

/// Invoked by the read loop for every decoded result
pub type ResultCallback = Arc<dyn Fn(SubResult) + Send + Sync>;

/// Read half handed to the read loop after the handshake
pub type SessionReader = Box<dyn AsyncRead + Send + Unpin>;

type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why a session's read loop ended
#[derive(Debug)]
pub enum SessionExit {
    /// Peer closed or reset the connection
    Closed,
    /// Peer sent something that is not a valid result frame
    Failed(FramingError),
    /// The read loop task itself died
    Panicked(String),
}

/// One connected worker
pub struct WorkerSession {
    id: u64,
    capacity: usize,
    peer: String,
    max_frame_len: usize,
    writer: tokio::sync::Mutex<SessionWriter>,
    callback: RwLock<Option<ResultCallback>>,
}

impl WorkerSession {
    /// Run the handshake on a fresh connection
    ///
    /// Sends `id`, then waits for the worker's capacity report. A report of
    /// zero is replaced by this host's hardware parallelism.
    pub async fn handshake<S>(
        stream: S,
        id: u64,
        peer: String,
        max_frame_len: usize,
    ) -> Result<(Arc<Self>, SessionReader), SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        if let Err(e) = write_record(&mut writer, &Handshake { session_id: id }).await {
            return Err(SessionError::Handshake {
                peer,
                source: FramingError::Io(e),
            });
        }

        let report: CapacityReport = match read_record(&mut reader, max_frame_len).await {
            Ok(report) => report,
            Err(source) => return Err(SessionError::Handshake { peer, source }),
        };

        let capacity = match report.capacity {
            0 => {
                let fallback = default_capacity();
                warn!(
                    "Worker {} ({}) reported 0 capacity, using default {}",
                    id, peer, fallback
                );
                fallback
            }
            n if n > MAX_DECLARED_CAPACITY => {
                return Err(SessionError::CapacityOutOfRange { peer, capacity: n });
            }
            n => {
                info!("Worker {} ({}) reported capacity {}", id, peer, n);
                n as usize
            }
        };

        let session = Arc::new(Self {
            id,
            capacity,
            peer,
            max_frame_len,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            callback: RwLock::new(None),
        });

        Ok((session, Box::new(reader)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Install the function that receives this session's results
    ///
    /// Must happen before any task is dispatched here, or early results are
    /// dropped.
    pub fn set_result_callback(&self, callback: ResultCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Write one sub-task frame, exclusive of any other writer on this session
    pub async fn send_task(&self, task: &SubTask) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        write_record(&mut *writer, task)
            .await
            .map_err(|source| SessionError::Send {
                session_id: self.id,
                task_id: task.id,
                source,
            })?;
        debug!(
            "Sub-task {} [{}, {}) sent to worker {}",
            task.id, task.lower, task.upper, self.id
        );
        Ok(())
    }

    /// Start the inbound read loop on its own task
    ///
    /// The loop ends on the first decode failure; a closed stream is a normal
    /// disconnect, anything else is reported as `Failed`.
    pub fn spawn_read_loop(self: &Arc<Self>, mut reader: SessionReader) -> JoinHandle<SessionExit> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match read_record::<SubResult, _>(&mut reader, session.max_frame_len).await {
                    Ok(result) => {
                        debug!(
                            "Result for sub-task {} from worker {}: {}",
                            result.id, session.id, result.value
                        );
                        let callback = session.callback.read().clone();
                        match callback {
                            Some(callback) => callback(result),
                            None => warn!(
                                "Worker {} sent result {} before any job was dispatched; dropped",
                                session.id, result.id
                            ),
                        }
                    }
                    Err(e) if e.is_disconnect() => return SessionExit::Closed,
                    Err(e) => return SessionExit::Failed(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::DEFAULT_MAX_FRAME_LEN;
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;

    async fn worker_side_handshake(stream: &mut DuplexStream, capacity: u64) -> u64 {
        let hs: Handshake = read_record(stream, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        write_record(stream, &CapacityReport { capacity }).await.unwrap();
        hs.session_id
    }

    #[tokio::test]
    async fn test_handshake_records_capacity() {
        let (coord, mut worker) = tokio::io::duplex(1024);
        let worker_task = tokio::spawn(async move {
            let id = worker_side_handshake(&mut worker, 6).await;
            (id, worker)
        });

        let (session, _reader) =
            WorkerSession::handshake(coord, 3, "test".into(), DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
        let (id, _worker) = worker_task.await.unwrap();

        assert_eq!(id, 3);
        assert_eq!(session.id(), 3);
        assert_eq!(session.capacity(), 6);
        assert_eq!(session.peer(), "test");
    }

    #[tokio::test]
    async fn test_zero_capacity_uses_default() {
        let (coord, mut worker) = tokio::io::duplex(1024);
        let worker_task = tokio::spawn(async move {
            worker_side_handshake(&mut worker, 0).await;
            worker
        });

        let (session, _reader) =
            WorkerSession::handshake(coord, 1, "test".into(), DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
        let _worker = worker_task.await.unwrap();

        assert_eq!(session.capacity(), default_capacity());
        assert!(session.capacity() >= 1);
    }

    #[tokio::test]
    async fn test_handshake_fails_when_worker_hangs_up() {
        let (coord, mut worker) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _: Handshake = read_record(&mut worker, DEFAULT_MAX_FRAME_LEN).await.unwrap();
            drop(worker);
        });

        let err = WorkerSession::handshake(coord, 1, "peer".into(), DEFAULT_MAX_FRAME_LEN)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SessionError::Handshake {
                source: FramingError::Closed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_absurd_capacity_rejected() {
        let (coord, mut worker) = tokio::io::duplex(1024);
        let worker_task = tokio::spawn(async move {
            worker_side_handshake(&mut worker, u64::MAX).await;
            worker
        });

        let err = WorkerSession::handshake(coord, 1, "peer".into(), DEFAULT_MAX_FRAME_LEN)
            .await
            .err()
            .unwrap();
        let _worker = worker_task.await.unwrap();
        assert!(matches!(err, SessionError::CapacityOutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_read_loop_forwards_results_then_reports_close() {
        let (coord, mut worker) = tokio::io::duplex(4096);
        let worker_task = tokio::spawn(async move {
            worker_side_handshake(&mut worker, 2).await;
            worker
        });
        let (session, reader) =
            WorkerSession::handshake(coord, 1, "test".into(), DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
        let mut worker = worker_task.await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.set_result_callback(Arc::new(move |r: SubResult| sink.lock().push(r)));
        let read_loop = session.spawn_read_loop(reader);

        write_record(&mut worker, &SubResult { id: 4, value: 1.5 }).await.unwrap();
        write_record(&mut worker, &SubResult { id: 5, value: 2.5 }).await.unwrap();
        drop(worker);

        let exit = read_loop.await.unwrap();
        assert!(matches!(exit, SessionExit::Closed));
        assert_eq!(
            *seen.lock(),
            vec![SubResult { id: 4, value: 1.5 }, SubResult { id: 5, value: 2.5 }]
        );
    }

    #[tokio::test]
    async fn test_read_loop_fails_on_wrong_record() {
        let (coord, mut worker) = tokio::io::duplex(4096);
        let worker_task = tokio::spawn(async move {
            worker_side_handshake(&mut worker, 1).await;
            worker
        });
        let (session, reader) =
            WorkerSession::handshake(coord, 1, "test".into(), DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
        let mut worker = worker_task.await.unwrap();
        let read_loop = session.spawn_read_loop(reader);

        write_record(&mut worker, &CapacityReport { capacity: 1 }).await.unwrap();

        let exit = read_loop.await.unwrap();
        assert!(matches!(
            exit,
            SessionExit::Failed(FramingError::UnexpectedKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (coord, mut worker) = tokio::io::duplex(64 * 1024);
        let worker_task = tokio::spawn(async move {
            worker_side_handshake(&mut worker, 1).await;
            worker
        });
        let (session, _reader) =
            WorkerSession::handshake(coord, 1, "test".into(), DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
        let mut worker = worker_task.await.unwrap();

        let mut sends = Vec::new();
        for i in 0..50u64 {
            let session = Arc::clone(&session);
            sends.push(tokio::spawn(async move {
                let task = SubTask {
                    id: i,
                    lower: i as f64,
                    upper: i as f64 + 1.0,
                    step: 0.1,
                };
                session.send_task(&task).await.unwrap();
            }));
        }
        for send in sends {
            send.await.unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..50 {
            let task: SubTask = read_record(&mut worker, DEFAULT_MAX_FRAME_LEN).await.unwrap();
            assert_eq!(task.upper - task.lower, 1.0);
            assert_eq!(task.lower, task.id as f64);
            ids.push(task.id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_fails_after_peer_closes() {
        let (coord, mut worker) = tokio::io::duplex(1024);
        let worker_task = tokio::spawn(async move {
            worker_side_handshake(&mut worker, 1).await;
            worker
        });
        let (session, _reader) =
            WorkerSession::handshake(coord, 9, "test".into(), DEFAULT_MAX_FRAME_LEN)
                .await
                .unwrap();
        drop(worker_task.await.unwrap());

        let task = SubTask {
            id: 1,
            lower: 0.0,
            upper: 1.0,
            step: 0.1,
        };
        let err = session.send_task(&task).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Send {
                session_id: 9,
                task_id: 1,
                ..
            }
        ));
    }
}
