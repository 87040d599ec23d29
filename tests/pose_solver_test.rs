//! Pose solver tests on synthetic faces with known orientation


use head_pose_telemetry::{
    constants::ANGLE_SCALE,
    landmarks::{CanonicalLandmark, CanonicalLandmarks, FaceLandmarks},
    pose_estimation::{PoseEstimate, PoseSolver},
};
use proptest::prelude::*;
use test_helpers::{collinear_face, frontal_face, posed_face, FRAME_HEIGHT, FRAME_WIDTH};

/// Tolerance on streamed pitch/yaw (decomposition degrees × 360)
const SCALED_TOLERANCE: f64 = 1.0;

fn estimate(pitch: f64, yaw: f64, roll: f64) -> (f64, Result<(f64, f64), String>) {
    let canonical = CanonicalLandmarks::extract(&posed_face(pitch, yaw, roll)).unwrap();
    let outcome = PoseSolver::default().estimate(&canonical, FRAME_WIDTH, FRAME_HEIGHT);
    (
        outcome.roll,
        outcome.orientation.map(|o| (o.pitch, o.yaw)).map_err(|e| e.to_string()),
    )
}

#[test]
fn test_frontal_face_is_level() {
    let canonical = CanonicalLandmarks::extract(&frontal_face()).unwrap();
    let outcome = PoseSolver::default().estimate(&canonical, FRAME_WIDTH, FRAME_HEIGHT);

    let orientation = outcome.orientation.unwrap();
    assert!(orientation.pitch.abs() < SCALED_TOLERANCE, "pitch {}", orientation.pitch);
    assert!(orientation.yaw.abs() < SCALED_TOLERANCE, "yaw {}", orientation.yaw);
    assert!(outcome.roll.abs() < 1e-3, "roll {}", outcome.roll);
}

#[test]
fn test_output_is_scaled_degrees() {
    let (_, orientation) = estimate(10.0, 0.0, 0.0);
    let (pitch, yaw) = orientation.unwrap();
    assert!((pitch - 10.0 * ANGLE_SCALE).abs() < SCALED_TOLERANCE, "pitch {pitch}");
    assert!(yaw.abs() < SCALED_TOLERANCE, "yaw {yaw}");
}

#[test]
fn test_roll_follows_eye_line() {
    // Positive rotation about the optical axis drops the right eye in the image
    let (roll, _) = estimate(0.0, 0.0, 15.0);
    assert!((roll - 15.0).abs() < 1e-3, "roll {roll}");

    let (roll, _) = estimate(0.0, 0.0, -20.0);
    assert!((roll + 20.0).abs() < 1e-3, "roll {roll}");
}

#[test]
fn test_resolution_changes_are_handled() {
    let solver = PoseSolver::default();
    for &(width, height) in &[(320, 240), (1280, 720), (1920, 1080)] {
        let face = test_helpers::synthetic_face(
            &test_helpers::euler(5.0, -8.0, 0.0),
            &nalgebra::Vector3::new(0.0, 0.0, test_helpers::HEAD_DISTANCE),
            width,
            height,
        );
        let canonical = CanonicalLandmarks::extract(&face).unwrap();
        let orientation = solver.estimate(&canonical, width, height).orientation.unwrap();
        assert!((orientation.pitch - 5.0 * ANGLE_SCALE).abs() < SCALED_TOLERANCE, "{width}x{height}");
        assert!((orientation.yaw + 8.0 * ANGLE_SCALE).abs() < SCALED_TOLERANCE, "{width}x{height}");
    }
}

#[test]
fn test_failed_solve_holds_previous_pitch_and_yaw() {
    let canonical = CanonicalLandmarks::extract(&collinear_face()).unwrap();
    let outcome = PoseSolver::default().estimate(&canonical, FRAME_WIDTH, FRAME_HEIGHT);
    assert!(!outcome.is_solved());

    let previous = PoseEstimate::new(720.0, -360.0, 4.0);
    let pose = outcome.resolve(&previous);
    assert_eq!(pose.pitch, 720.0);
    assert_eq!(pose.yaw, -360.0);
    assert!(pose.roll.abs() < 1e-9, "eye line is horizontal, roll {}", pose.roll);
}

/// Shift every canonical point except the eye corners by `(dx, dy)` (normalized units)
fn move_non_eye_points(face: &mut FaceLandmarks, dx: f32, dy: f32) {
    for landmark in [
        CanonicalLandmark::NoseTip,
        CanonicalLandmark::Chin,
        CanonicalLandmark::LeftMouth,
        CanonicalLandmark::RightMouth,
    ] {
        let point = &mut face.0[landmark.mesh_index()];
        point.x += dx;
        point.y += dy;
    }
}

#[test]
fn test_roll_ignores_non_eye_landmarks() {
    let solver = PoseSolver::default();
    let original = posed_face(8.0, -12.0, 6.0);
    let before = solver.estimate(&CanonicalLandmarks::extract(&original).unwrap(), FRAME_WIDTH, FRAME_HEIGHT);

    let mut moved = original;
    move_non_eye_points(&mut moved, 0.0, 0.01);
    let after = solver.estimate(&CanonicalLandmarks::extract(&moved).unwrap(), FRAME_WIDTH, FRAME_HEIGHT);

    assert_eq!(after.roll, before.roll);
    let before = before.orientation.unwrap();
    let after = after.orientation.unwrap();
    assert!(
        (after.pitch - before.pitch).abs() > SCALED_TOLERANCE || (after.yaw - before.yaw).abs() > SCALED_TOLERANCE,
        "pitch/yaw did not react: {:?} vs {:?}",
        before,
        after
    );
}

#[test]
fn test_short_mesh_is_rejected() {
    let mut face = frontal_face();
    face.0.truncate(200);
    assert!(CanonicalLandmarks::extract(&face).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_recovers_synthetic_orientation(
        pitch in -25.0f64..25.0,
        yaw in -30.0f64..30.0,
        roll in -20.0f64..20.0,
    ) {
        let (measured_roll, orientation) = estimate(pitch, yaw, roll);
        let (measured_pitch, measured_yaw) = orientation.map_err(TestCaseError::fail)?;

        prop_assert!(measured_pitch.is_finite() && measured_yaw.is_finite() && measured_roll.is_finite());
        prop_assert!(
            (measured_pitch - pitch * ANGLE_SCALE).abs() < SCALED_TOLERANCE,
            "pitch {} vs {}", measured_pitch, pitch * ANGLE_SCALE
        );
        prop_assert!(
            (measured_yaw - yaw * ANGLE_SCALE).abs() < SCALED_TOLERANCE,
            "yaw {} vs {}", measured_yaw, yaw * ANGLE_SCALE
        );
    }

    #[test]
    fn prop_roll_depends_only_on_eyes(
        dx in -0.05f32..0.05,
        dy in -0.05f32..0.05,
        roll in -30.0f64..30.0,
    ) {
        let mut face = posed_face(4.0, -6.0, roll);
        let (expected, _) = estimate(4.0, -6.0, roll);
        move_non_eye_points(&mut face, dx, dy);

        let canonical = CanonicalLandmarks::extract(&face).unwrap();
        let outcome = PoseSolver::default().estimate(&canonical, FRAME_WIDTH, FRAME_HEIGHT);
        prop_assert_eq!(outcome.roll, expected);
    }

    #[test]
    fn prop_pure_roll_matches_eye_angle(roll in -60.0f64..60.0) {
        let (measured_roll, _) = estimate(0.0, 0.0, roll);
        prop_assert!((measured_roll - roll).abs() < 1e-3, "roll {} vs {}", measured_roll, roll);
    }
}
