//! Session registry
//!
//! Maps session ids to live `WorkerSession`s. Ids come from a monotonically
//! increasing counter starting at 1, and snapshots are ordered by id, which is
//! registration order. Each registered session gets a supervisor task that
//! waits for its read loop to end, removes the entry, and announces the
//! disconnect on the event channel.

use crate::distributed::session::{SessionExit, WorkerSession};
use crate::error::SessionError;
use log::info;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Lifecycle notifications emitted by the registry
#[derive(Debug)]
pub enum SessionEvent {
    Registered { id: u64, capacity: usize },
    Disconnected { id: u64, exit: SessionExit },
}

pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<u64, Arc<WorkerSession>>>,
    next_id: AtomicU64,
    max_frame_len: usize,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionRegistry {
    /// Create a registry and the receiver for its lifecycle events
    pub fn new(max_frame_len: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            sessions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            max_frame_len,
            events,
        });
        (registry, rx)
    }

    /// Handshake a new connection and add it to the registry
    ///
    /// On handshake failure nothing is inserted and the id is not reused.
    pub async fn register<S>(self: &Arc<Self>, stream: S, peer: String) -> Result<u64, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, reader) =
            WorkerSession::handshake(stream, id, peer, self.max_frame_len).await?;
        let capacity = session.capacity();

        self.sessions.lock().insert(id, Arc::clone(&session));
        info!(
            "Session {} registered from {} (capacity {}, {} connected)",
            id,
            session.peer(),
            capacity,
            self.len()
        );
        let _ = self.events.send(SessionEvent::Registered { id, capacity });

        let read_loop = session.spawn_read_loop(reader);
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let exit = match read_loop.await {
                Ok(exit) => exit,
                Err(e) => SessionExit::Panicked(e.to_string()),
            };
            registry.remove(id);
            let _ = registry.events.send(SessionEvent::Disconnected { id, exit });
        });

        Ok(id)
    }

    pub fn remove(&self, id: u64) -> Option<Arc<WorkerSession>> {
        self.sessions.lock().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<WorkerSession>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Current sessions in ascending id order
    ///
    /// The view may go stale as soon as the lock is released.
    pub fn snapshot(&self) -> Vec<Arc<WorkerSession>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn total_capacity(&self) -> usize {
        self.sessions.lock().values().map(|s| s.capacity()).sum()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
