//! Telemetry transports and the fixed-rate broadcast loop.
//!
//! Two bindings share one [`Subscribers`] seam:
//! - [`ClientRegistry`]: WebSocket fan-out to any number of clients
//! - [`ClientSlot`]: newline-delimited JSON to a single TCP client

pub mod broadcast;
pub mod point_to_point;
pub mod registry;
pub mod websocket;

pub use broadcast::{BroadcastLoop, TickOutcome};
pub use point_to_point::{serve_point_to_point, ClientSlot};
pub use registry::{ClientId, ClientRegistry};
pub use websocket::{router, serve_websocket};

use crate::{Error, Result};
use std::{future::Future, net::SocketAddr, ops::AddAssign, sync::Arc};
use tokio::net::TcpListener;

/// Per-tick delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients that accepted the message
    pub delivered: usize,
    /// Clients too far behind to take this tick
    pub skipped: usize,
    /// Clients removed because their connection failed
    pub disconnected: usize,
}

impl AddAssign for DeliveryReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.disconnected += other.disconnected;
    }
}

/// Set of connected telemetry consumers
pub trait Subscribers: Send + Sync {
    fn has_clients(&self) -> bool;

    /// Deliver one payload to every client. A failing client never blocks
    /// or aborts delivery to the others.
    fn deliver(&self, payload: Arc<str>) -> impl Future<Output = DeliveryReport> + Send;

    /// Disconnect everyone
    fn close_all(&self) -> impl Future<Output = ()> + Send;
}

/// Bind the listen address, reporting the address on failure
///
/// # Errors
///
/// Returns [`Error::Bind`] if the socket cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accumulates() {
        let mut total = DeliveryReport::default();
        total += DeliveryReport {
            delivered: 2,
            skipped: 1,
            disconnected: 0,
        };
        total += DeliveryReport {
            delivered: 1,
            skipped: 0,
            disconnected: 3,
        };
        assert_eq!(
            total,
            DeliveryReport {
                delivered: 3,
                skipped: 1,
                disconnected: 3
            }
        );
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_address() {
        let first = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();

        match bind(addr).await {
            Err(Error::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            other => panic!("expected bind error, got {other:?}"),
        }
    }
}
