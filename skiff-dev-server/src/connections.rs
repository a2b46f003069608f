use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Sender half for one open live-reload socket.
pub type ConnectionTx = mpsc::UnboundedSender<String>;

/// The open live-reload sockets.
///
/// Registration, removal and broadcast all take the same lock, so a socket
/// closing in the middle of a broadcast is either sent to or already gone.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSet {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, ConnectionTx>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn senders(&self) -> MutexGuard<'_, HashMap<u64, ConnectionTx>> {
        // A panic while holding the lock leaves the map itself intact.
        self.inner
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a socket and get its id plus the receiver to forward from.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.senders().remove(&id);
    }

    /// Send `message` to every registered socket, dropping the ones whose
    /// receiver is gone. Returns how many sockets got the message.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut senders = self.senders();
        senders.retain(|_, tx| tx.send(message.to_string()).is_ok());
        senders.len()
    }

    pub fn len(&self) -> usize {
        self.senders().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders().is_empty()
    }
}
