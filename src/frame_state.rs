//! Latest-value store shared between the capture loop and the broadcast loop.

use crate::pose_estimation::PoseEstimate;
use image::RgbImage;
use std::sync::{Arc, PoisonError, RwLock};

/// Point-in-time copy of the shared state
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub pose: PoseEstimate,
    pub frame: Option<Arc<RgbImage>>,
    /// Number of completed capture cycles when the snapshot was taken
    pub cycle: u64,
}

#[derive(Debug, Default)]
struct Inner {
    pose: PoseEstimate,
    frame: Option<Arc<RgbImage>>,
    cycle: u64,
}

/// Current pose, most recent frame and a capture cycle counter.
///
/// One writer (the capture loop) replaces values wholesale; readers always
/// observe a pose and frame published by the same cycle or later.
#[derive(Debug, Default)]
pub struct SharedFrameState {
    inner: RwLock<Inner>,
}

impl SharedFrameState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete one capture cycle.
    ///
    /// A `None` pose keeps the previous one; a `None` frame keeps the previous frame.
    pub fn publish(&self, pose: Option<PoseEstimate>, frame: Option<RgbImage>) -> u64 {
        let frame = frame.map(Arc::new);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pose) = pose {
            inner.pose = pose;
        }
        if frame.is_some() {
            inner.frame = frame;
        }
        inner.cycle += 1;
        inner.cycle
    }

    /// Snapshot of the state, or `None` before the first completed cycle
    #[must_use]
    pub fn snapshot(&self) -> Option<FrameSnapshot> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (inner.cycle > 0).then(|| FrameSnapshot {
            pose: inner.pose,
            frame: inner.frame.clone(),
            cycle: inner.cycle,
        })
    }

    #[must_use]
    pub fn latest_pose(&self) -> PoseEstimate {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).pose
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).cycle
    }
}
