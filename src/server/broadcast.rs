use super::{DeliveryReport, Subscribers};
use crate::{
    constants::{DEFAULT_JPEG_QUALITY, MIN_BROADCAST_PERIOD},
    frame_state::SharedFrameState,
    protocol::build_message,
    Result,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};

/// What one broadcast tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody is connected; nothing was encoded or sent
    NoClients,
    /// No capture cycle has completed yet
    ColdStart,
    /// Frames are enabled but none has been captured yet
    AwaitingFrame,
    Sent(DeliveryReport),
}

/// Emits the latest pose (and frame) to all subscribers at a fixed cadence,
/// independent of the capture rate.
pub struct BroadcastLoop<S> {
    state: Arc<SharedFrameState>,
    subscribers: Arc<S>,
    period: Duration,
    include_frame: bool,
    jpeg_quality: u8,
}

impl<S: Subscribers + 'static> BroadcastLoop<S> {
    /// `period` is raised to [`MIN_BROADCAST_PERIOD`] if shorter
    pub fn new(state: Arc<SharedFrameState>, subscribers: Arc<S>, period: Duration) -> Self {
        Self {
            state,
            subscribers,
            period: period.max(MIN_BROADCAST_PERIOD),
            include_frame: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    #[must_use]
    pub fn include_frame(mut self, include_frame: bool) -> Self {
        self.include_frame = include_frame;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, jpeg_quality: u8) -> Self {
        self.jpeg_quality = jpeg_quality;
        self
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Snapshot, encode and deliver once
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn tick(&self) -> Result<TickOutcome> {
        if !self.subscribers.has_clients() {
            return Ok(TickOutcome::NoClients);
        }
        let Some(snapshot) = self.state.snapshot() else {
            return Ok(TickOutcome::ColdStart);
        };
        if self.include_frame && snapshot.frame.is_none() {
            return Ok(TickOutcome::AwaitingFrame);
        }

        let include_frame = self.include_frame;
        let quality = self.jpeg_quality;
        let message = if include_frame {
            // JPEG encoding is CPU-bound
            tokio::task::spawn_blocking(move || build_message(&snapshot, include_frame, quality)).await??
        } else {
            build_message(&snapshot, include_frame, quality)?
        };
        let Some(message) = message else {
            return Ok(TickOutcome::AwaitingFrame);
        };

        let payload: Arc<str> = Arc::from(message.to_json()?);
        let report = self.subscribers.deliver(payload).await;
        if report.disconnected > 0 {
            log::debug!("{} client(s) dropped during broadcast", report.disconnected);
        }
        Ok(TickOutcome::Sent(report))
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!(
            "Broadcasting every {:?} ({})",
            self.period,
            if self.include_frame { "pose + frame" } else { "pose only" }
        );

        let mut sent: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.tick().await {
                    Ok(TickOutcome::Sent(_)) => sent += 1,
                    Ok(outcome) => log::trace!("Broadcast tick: {:?}", outcome),
                    Err(e) => log::warn!("Broadcast tick failed: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Broadcast loop stopped after {} messages", sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pose_estimation::PoseEstimate, protocol::PoseMessage, server::ClientRegistry};
    use image::RgbImage;
    use std::net::SocketAddr;

    fn setup(include_frame: bool) -> (Arc<SharedFrameState>, Arc<ClientRegistry>, BroadcastLoop<ClientRegistry>) {
        let state = Arc::new(SharedFrameState::new());
        let registry = Arc::new(ClientRegistry::new());
        let broadcast = BroadcastLoop::new(Arc::clone(&state), Arc::clone(&registry), Duration::from_millis(10))
            .include_frame(include_frame);
        (state, registry, broadcast)
    }

    fn client_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5000))
    }

    #[tokio::test]
    async fn test_no_clients_no_work() {
        let (state, _registry, broadcast) = setup(true);
        state.publish(Some(PoseEstimate::new(1.0, 2.0, 3.0)), Some(RgbImage::new(4, 4)));
        assert_eq!(broadcast.tick().await.unwrap(), TickOutcome::NoClients);
    }

    #[tokio::test]
    async fn test_cold_start_sends_nothing() {
        let (_state, registry, broadcast) = setup(false);
        let (_, mut rx) = registry.register(client_addr());
        assert_eq!(broadcast.tick().await.unwrap(), TickOutcome::ColdStart);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_awaits_first_frame() {
        let (state, registry, broadcast) = setup(true);
        let (_, _rx) = registry.register(client_addr());
        state.publish(Some(PoseEstimate::new(1.0, 2.0, 3.0)), None);
        assert_eq!(broadcast.tick().await.unwrap(), TickOutcome::AwaitingFrame);
    }

    #[tokio::test]
    async fn test_pose_only_message() {
        let (state, registry, broadcast) = setup(false);
        let (_, mut rx) = registry.register(client_addr());
        state.publish(Some(PoseEstimate::new(1.0, 2.0, 3.0)), Some(RgbImage::new(4, 4)));

        let outcome = broadcast.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Sent(report) if report.delivered == 1));

        let message = PoseMessage::from_json(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(message.pose(), PoseEstimate::new(1.0, 2.0, 3.0));
        assert!(message.frame.is_none());
    }

    #[tokio::test]
    async fn test_frame_message() {
        let (state, registry, broadcast) = setup(true);
        let (_, mut rx) = registry.register(client_addr());
        state.publish(Some(PoseEstimate::default()), Some(RgbImage::new(32, 24)));

        broadcast.tick().await.unwrap();
        let message = PoseMessage::from_json(&rx.recv().await.unwrap()).unwrap();
        assert!(message.frame.is_some_and(|f| !f.is_empty()));
    }

    #[tokio::test]
    async fn test_failed_client_dropped_once() {
        let (state, registry, broadcast) = setup(false);
        let (_, rx) = registry.register(client_addr());
        state.publish(Some(PoseEstimate::default()), None);
        drop(rx);

        let outcome = broadcast.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Sent(report) if report.disconnected == 1 && report.delivered == 0));
        assert_eq!(broadcast.tick().await.unwrap(), TickOutcome::NoClients);
    }

    #[tokio::test]
    async fn test_zero_period_runs_at_floor() {
        let state = Arc::new(SharedFrameState::new());
        let registry = Arc::new(ClientRegistry::new());
        let broadcast = BroadcastLoop::new(Arc::clone(&state), Arc::clone(&registry), Duration::ZERO).include_frame(false);
        assert_eq!(broadcast.period(), MIN_BROADCAST_PERIOD);

        let (_, mut rx) = registry.register(client_addr());
        state.publish(Some(PoseEstimate::default()), None);
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(broadcast.run(shutdown));

        assert!(rx.recv().await.is_some());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (state, registry, broadcast) = setup(false);
        let (_, mut rx) = registry.register(client_addr());
        state.publish(Some(PoseEstimate::new(0.5, 0.5, 0.5)), None);

        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(broadcast.run(shutdown));

        assert!(rx.recv().await.is_some());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
