//! Capture/detect loop: frame source → landmark detector → pose solver → shared state.

use crate::{
    frame_state::SharedFrameState,
    landmarks::{CanonicalLandmarks, FaceDetectionResult},
    pose_estimation::{PoseEstimate, PoseSolver},
    Result,
};
use image::RgbImage;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// What a frame source produced for one grab
#[derive(Debug)]
pub enum FrameGrab {
    Frame(RgbImage),
    /// Nothing available right now; try again shortly
    Retry,
    /// The source is exhausted or gone
    Closed,
}

/// Produces RGB frames at its own cadence
pub trait FrameSource: Send {
    /// Grab the next frame. May block until one is available.
    ///
    /// # Errors
    ///
    /// Returns an error on a transient acquisition failure.
    fn grab(&mut self) -> Result<FrameGrab>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn grab(&mut self) -> Result<FrameGrab> {
        (**self).grab()
    }
}

/// Finds face landmarks in an RGB frame
pub trait LandmarkDetector: Send {
    /// `timestamp_ms` is strictly increasing across calls.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn detect(&mut self, frame: &RgbImage, timestamp_ms: u64) -> Result<FaceDetectionResult>;
}

impl<T: LandmarkDetector + ?Sized> LandmarkDetector for Box<T> {
    fn detect(&mut self, frame: &RgbImage, timestamp_ms: u64) -> Result<FaceDetectionResult> {
        (**self).detect(frame, timestamp_ms)
    }
}

/// Millisecond timestamps that never repeat, even within one clock tick
#[derive(Debug)]
pub struct DetectorClock {
    origin: Instant,
    last: Option<u64>,
}

impl Default for DetectorClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: None,
        }
    }

    pub fn next_timestamp(&mut self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        let next = match self.last {
            Some(last) => elapsed.max(last.saturating_add(1)),
            None => elapsed,
        };
        self.last = Some(next);
        next
    }
}

/// Result of one capture cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Full pose solved and published
    Updated(PoseEstimate),
    /// Solve failed: pitch/yaw held, roll updated
    PoseHeld(PoseEstimate),
    /// No usable face in the frame
    NoFace,
    /// The source had no frame this time
    NoFrame,
    /// The source is exhausted
    Closed,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub updated: u64,
    pub held: u64,
    pub no_face: u64,
    pub retries: u64,
}

impl CaptureStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Updated(_) => {
                self.frames += 1;
                self.updated += 1;
            }
            CycleOutcome::PoseHeld(_) => {
                self.frames += 1;
                self.held += 1;
            }
            CycleOutcome::NoFace => {
                self.frames += 1;
                self.no_face += 1;
            }
            CycleOutcome::NoFrame => self.retries += 1,
            CycleOutcome::Closed => {}
        }
    }
}

/// Drives one frame source and detector, publishing into [`SharedFrameState`]
pub struct CaptureLoop<S, D> {
    source: S,
    detector: D,
    solver: PoseSolver,
    state: Arc<SharedFrameState>,
    clock: DetectorClock,
    include_frame: bool,
    retry_delay: Duration,
}

impl<S: FrameSource, D: LandmarkDetector> CaptureLoop<S, D> {
    pub fn new(source: S, detector: D, state: Arc<SharedFrameState>) -> Self {
        Self {
            source,
            detector,
            solver: PoseSolver::default(),
            state,
            clock: DetectorClock::new(),
            include_frame: true,
            retry_delay: Duration::from_millis(crate::constants::DEFAULT_RETRY_DELAY_MS),
        }
    }

    #[must_use]
    pub fn with_solver(mut self, solver: PoseSolver) -> Self {
        self.solver = solver;
        self
    }

    /// Whether frames are stored for the broadcast loop
    #[must_use]
    pub fn include_frame(mut self, include_frame: bool) -> Self {
        self.include_frame = include_frame;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Run one grab → detect → solve → publish cycle
    ///
    /// # Errors
    ///
    /// Returns an error only if the frame source reports one; detector
    /// failures are logged and treated as an empty detection.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let frame = match self.source.grab()? {
            FrameGrab::Frame(frame) => frame,
            FrameGrab::Retry => return Ok(CycleOutcome::NoFrame),
            FrameGrab::Closed => return Ok(CycleOutcome::Closed),
        };
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            log::warn!("Skipping empty {}x{} frame", width, height);
            return Ok(CycleOutcome::NoFrame);
        }

        let timestamp = self.clock.next_timestamp();
        let detection = self.detector.detect(&frame, timestamp).unwrap_or_else(|e| {
            log::warn!("Landmark detection failed: {}", e);
            FaceDetectionResult::empty()
        });

        let canonical = match detection.first_face().map(CanonicalLandmarks::extract) {
            Some(Ok(canonical)) => Some(canonical),
            Some(Err(e)) => {
                log::warn!("Unusable face: {}", e);
                None
            }
            None => None,
        };
        let stored_frame = self.include_frame.then_some(frame);

        let Some(canonical) = canonical else {
            log::trace!("No face at t={}ms", timestamp);
            self.state.publish(None, stored_frame);
            return Ok(CycleOutcome::NoFace);
        };

        let outcome = self.solver.estimate(&canonical, width, height);
        let pose = outcome.resolve(&self.state.latest_pose());
        self.state.publish(Some(pose), stored_frame);

        match &outcome.orientation {
            Ok(_) => {
                log::trace!(
                    "Pose at t={}ms: pitch={:.2} yaw={:.2} roll={:.2}",
                    timestamp,
                    pose.pitch,
                    pose.yaw,
                    pose.roll
                );
                Ok(CycleOutcome::Updated(pose))
            }
            Err(e) => {
                log::debug!("Holding previous pitch/yaw: {}", e);
                Ok(CycleOutcome::PoseHeld(pose))
            }
        }
    }

    /// Loop until `running` clears or the source closes
    pub fn run(&mut self, running: &AtomicBool) -> CaptureStats {
        let mut stats = CaptureStats::default();
        log::info!("Capture loop started");

        while running.load(Ordering::Relaxed) {
            match self.run_cycle() {
                Ok(CycleOutcome::Closed) => {
                    log::info!("Frame source closed");
                    break;
                }
                Ok(CycleOutcome::NoFrame) => {
                    stats.record(&CycleOutcome::NoFrame);
                    std::thread::sleep(self.retry_delay);
                }
                Ok(outcome) => stats.record(&outcome),
                Err(e) => {
                    log::warn!("Failed to grab frame: {}", e);
                    stats.retries += 1;
                    std::thread::sleep(self.retry_delay);
                }
            }
        }

        log::info!(
            "Capture loop stopped after {} frames ({} updated, {} held, {} without face)",
            stats.frames,
            stats.updated,
            stats.held,
            stats.no_face
        );
        stats
    }
}
