//! Registry of live client sessions bridged to one backend
//!
//! The registry only counts and severs sessions. The task that runs a
//! session owns its sockets; it holds a [`Session`] guard whose drop
//! unregisters it and tells a pending sever that the sockets are gone.

use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

struct SessionEntry {
    sever: oneshot::Sender<()>,
    closed: oneshot::Receiver<()>,
}

type Entries = Arc<Mutex<FnvHashMap<u64, SessionEntry>>>;

/// Guard held by the task that owns a session's sockets
pub struct Session {
    id: u64,
    client_addr: SocketAddr,
    /// Fires when the backend severs this session
    pub(crate) sever: oneshot::Receiver<()>,
    // Dropped last; a sever waiting on the other end resumes once this goes
    _closed: oneshot::Sender<()>,
    entries: Entries,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.entries.lock().remove(&self.id);
    }
}

/// Sessions that were severed and are being torn down by their tasks
pub struct SeveredSessions {
    closed: Vec<oneshot::Receiver<()>>,
}

impl SeveredSessions {
    pub fn len(&self) -> usize {
        self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }

    /// Resolves once every severed session has dropped its sockets
    pub async fn closed(self) {
        futures::future::join_all(self.closed).await;
    }
}

/// Session registry for one backend
#[derive(Default)]
pub struct SessionRegistry {
    entries: Entries,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for a client connection
    pub fn open(&self, client_addr: SocketAddr) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sever_tx, sever_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        self.entries.lock().insert(
            id,
            SessionEntry {
                sever: sever_tx,
                closed: closed_rx,
            },
        );

        Session {
            id,
            client_addr,
            sever: sever_rx,
            _closed: closed_tx,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister every session and signal each one to close.
    ///
    /// Returns immediately; await [`SeveredSessions::closed`] to know the
    /// sockets have actually been dropped.
    pub fn sever_all(&self) -> SeveredSessions {
        let drained: Vec<SessionEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();

        let closed = drained
            .into_iter()
            .map(|entry| {
                // The task may already be finishing; a failed send is fine
                let _ = entry.sever.send(());
                entry.closed
            })
            .collect();

        SeveredSessions { closed }
    }
}
