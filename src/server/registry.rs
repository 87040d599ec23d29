use super::{DeliveryReport, Subscribers};
use crate::constants::CLIENT_QUEUE_DEPTH;
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};

pub type ClientId = u64;

#[derive(Debug)]
struct ClientHandle {
    addr: SocketAddr,
    sender: mpsc::Sender<Arc<str>>,
}

/// Fan-out client set.
///
/// Each client owns a bounded queue drained by its connection task. Delivery
/// never waits: a full queue skips that client for the tick, a closed queue
/// removes it.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_depth(CLIENT_QUEUE_DEPTH)
    }

    #[must_use]
    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Add a client; its connection task drains the returned receiver
    pub fn register(&self, addr: SocketAddr) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        self.lock().insert(id, ClientHandle { addr, sender });
        log::debug!("Registered client {} ({})", id, addr);
        (id, receiver)
    }

    /// Remove a client; returns whether it was still registered
    pub fn deregister(&self, id: ClientId) -> bool {
        let removed = self.lock().remove(&id);
        if let Some(handle) = &removed {
            log::debug!("Deregistered client {} ({})", id, handle.addr);
        }
        removed.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.lock().values().map(|h| h.addr).collect()
    }

    /// Offer `payload` to every client without waiting
    pub fn broadcast(&self, payload: &Arc<str>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut clients = self.lock();

        clients.retain(|id, handle| match handle.sender.try_send(Arc::clone(payload)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::trace!("Client {} is behind, skipping tick", id);
                report.skipped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("Client {} ({}) disconnected", id, handle.addr);
                report.disconnected += 1;
                false
            }
        });
        report
    }

    /// Drop every queue; connection tasks see the closed queue and hang up
    pub fn clear(&self) -> usize {
        let mut clients = self.lock();
        let count = clients.len();
        clients.clear();
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, ClientHandle>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Subscribers for ClientRegistry {
    fn has_clients(&self) -> bool {
        !self.is_empty()
    }

    fn deliver(&self, payload: Arc<str>) -> impl Future<Output = DeliveryReport> + Send {
        std::future::ready(self.broadcast(&payload))
    }

    fn close_all(&self) -> impl Future<Output = ()> + Send {
        let closed = self.clear();
        if closed > 0 {
            log::info!("Closing {} client connection(s)", closed);
        }
        std::future::ready(())
    }
}
