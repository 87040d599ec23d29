use super::{DeliveryReport, Subscribers};
use crate::constants::DEFAULT_WRITE_TIMEOUT_MS;
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{watch, Mutex},
};

struct Connection<W> {
    peer: SocketAddr,
    stream: W,
}

/// Single-client slot for the point-to-point binding.
///
/// A newly accepted connection replaces (and shuts down) the previous one.
pub struct ClientSlot<W = TcpStream> {
    active: Mutex<Option<Connection<W>>>,
    write_timeout: Duration,
}

impl<W> Default for ClientSlot<W> {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS))
    }
}

impl<W> ClientSlot<W> {
    #[must_use]
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            active: Mutex::new(None),
            write_timeout,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> ClientSlot<W> {
    /// Install a new client, returning the peer it displaced
    pub async fn replace(&self, peer: SocketAddr, stream: W) -> Option<SocketAddr> {
        let previous = self.active.lock().await.replace(Connection { peer, stream });
        match previous {
            Some(mut old) => {
                let _ = old.stream.shutdown().await;
                Some(old.peer)
            }
            None => None,
        }
    }

    /// Drop the current client, if any
    pub async fn clear(&self) -> Option<SocketAddr> {
        let previous = self.active.lock().await.take();
        match previous {
            Some(mut old) => {
                let _ = old.stream.shutdown().await;
                Some(old.peer)
            }
            None => None,
        }
    }

    pub async fn peer(&self) -> Option<SocketAddr> {
        self.active.lock().await.as_ref().map(|c| c.peer)
    }

    /// Whether a client is connected; a slot busy with a write counts as occupied
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.active.try_lock().map_or(true, |active| active.is_some())
    }

    /// Write one newline-terminated payload to the current client
    pub async fn send_line(&self, payload: &str) -> DeliveryReport {
        let mut line = String::with_capacity(payload.len() + 1);
        line.push_str(payload);
        line.push('\n');

        let mut active = self.active.lock().await;
        let Some(connection) = active.as_mut() else {
            return DeliveryReport::default();
        };

        let written = tokio::time::timeout(self.write_timeout, connection.stream.write_all(line.as_bytes())).await;
        let failure = match written {
            Ok(Ok(())) => {
                return DeliveryReport {
                    delivered: 1,
                    ..DeliveryReport::default()
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write timed out after {:?}", self.write_timeout),
        };

        if let Some(mut dropped) = active.take() {
            log::warn!("Dropping client {}: {}", dropped.peer, failure);
            let _ = dropped.stream.shutdown().await;
        }
        DeliveryReport {
            disconnected: 1,
            ..DeliveryReport::default()
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> Subscribers for ClientSlot<W> {
    fn has_clients(&self) -> bool {
        self.is_occupied()
    }

    async fn deliver(&self, payload: Arc<str>) -> DeliveryReport {
        self.send_line(&payload).await
    }

    async fn close_all(&self) {
        if let Some(peer) = self.clear().await {
            log::info!("Closed client connection {}", peer);
        }
    }
}

/// Accept TCP clients into `slot` until shutdown
///
/// # Errors
///
/// Returns an error if accepting fails irrecoverably.
pub async fn serve_point_to_point(
    listener: TcpListener,
    slot: Arc<ClientSlot>,
    mut shutdown: watch::Receiver<bool>,
) -> crate::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("TCP telemetry listening on {}", addr);
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
                }
                log::info!("Client connected: {}", peer);
                if let Some(previous) = slot.replace(peer, stream).await {
                    log::info!("Replaced previous client {}", previous);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    slot.close_all().await;
    log::info!("TCP listener stopped");
    Ok(())
}
