//! Client registry
//!
//! The authoritative set of currently connected listener sockets. Two
//! actors touch it: the connection acceptor inserts, the broadcast loop
//! iterates and removes. One mutex guards every read-then-mutate
//! sequence; the loop takes it exactly once per iteration, so no client
//! can be added or removed mid-snapshot. The user count is mirrored in
//! an atomic so status surfaces can observe it without contending for
//! the lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Registry-assigned client identifier, never reused.
pub type ClientId = u64;

/// One connected listener socket.
pub struct Client {
    id: ClientId,
    stream: TcpStream,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The underlying socket. All loop-side I/O goes through the
    /// non-blocking `try_read`/`try_write` calls, which only need a
    /// shared reference.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

struct RegistryInner {
    clients: Mutex<BTreeMap<ClientId, Client>>,
    num_users: AtomicUsize,
    next_id: AtomicU64,
}

/// Cloneable handle to the shared client set.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: Mutex::new(BTreeMap::new()),
                num_users: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Inserts an accepted connection. Safe to call concurrently with
    /// broadcast iterations; the client is picked up on the next one.
    pub async fn add(&self, stream: TcpStream) -> ClientId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.inner.clients.lock().await;
        clients.insert(id, Client { id, stream });
        self.inner.num_users.fetch_add(1, Ordering::SeqCst);
        info!(client = id, "Added client");
        id
    }

    /// Current number of connected clients, readable without the lock.
    pub fn num_users(&self) -> usize {
        self.inner.num_users.load(Ordering::SeqCst)
    }

    /// Takes the registry lock for one whole broadcast iteration.
    pub async fn clients(&self) -> ClientSet<'_> {
        ClientSet {
            guard: self.inner.clients.lock().await,
            num_users: &self.inner.num_users,
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive view of the client set for the duration of one iteration.
///
/// Removal goes through this guard so the user count can never drift
/// from the set's cardinality.
pub struct ClientSet<'a> {
    guard: MutexGuard<'a, BTreeMap<ClientId, Client>>,
    num_users: &'a AtomicUsize,
}

impl ClientSet<'_> {
    /// Snapshot of the ids present right now, in insertion order.
    pub fn ids(&self) -> Vec<ClientId> {
        self.guard.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.guard.get(&id)
    }

    /// Removes and closes one client. Removing an id that is already
    /// gone is a no-op.
    pub fn remove_and_close(&mut self, id: ClientId) {
        if self.guard.remove(&id).is_some() {
            self.num_users.fetch_sub(1, Ordering::SeqCst);
            info!(client = id, "Removed client");
        }
        // Dropping the TcpStream closes the socket.
    }

    /// Closes every client and resets the count. Returns how many were
    /// dropped. Used by the unconditional teardown path.
    pub fn close_all(&mut self) -> usize {
        let dropped = self.guard.len();
        self.guard.clear();
        self.num_users.store(0, Ordering::SeqCst);
        if dropped > 0 {
            debug!(clients = dropped, "Closed all clients");
        }
        dropped
    }
}
