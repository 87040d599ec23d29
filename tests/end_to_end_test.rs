//! End-to-end tests: frame source → replayed landmarks → pose → telemetry client


use futures_util::StreamExt;
use head_pose_telemetry::{
    app::TelemetryService,
    capture::{CaptureLoop, CycleOutcome, FrameGrab, FrameSource},
    config::{Config, ServerConfig, Transport},
    constants::ANGLE_SCALE,
    detection::ReplayDetector,
    frame_state::SharedFrameState,
    landmarks::FaceDetectionResult,
    protocol::PoseMessage,
    server::{BroadcastLoop, ClientRegistry, TickOutcome},
    sources::ImageDirSource,
    Result,
};
use image::RgbImage;
use std::{io::Cursor, net::SocketAddr, sync::Arc, time::Duration};
use test_helpers::{collinear_face, frontal_face, landmark_lines, posed_face, FRAME_HEIGHT, FRAME_WIDTH};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    sync::oneshot,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(10);

/// Yields a fixed number of frames, then never produces another
struct FiniteThenIdle {
    remaining: usize,
}

impl FrameSource for FiniteThenIdle {
    fn grab(&mut self) -> Result<FrameGrab> {
        if self.remaining == 0 {
            return Ok(FrameGrab::Retry);
        }
        self.remaining -= 1;
        Ok(FrameGrab::Frame(RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT)))
    }
}

fn replay(faces: Vec<FaceDetectionResult>) -> ReplayDetector {
    ReplayDetector::from_reader(Cursor::new(landmark_lines(&faces)))
}

fn config(transport: Transport, include_frame: bool) -> Config {
    Config {
        server: ServerConfig {
            transport,
            port: Some(0),
            broadcast_rate_hz: Some(100.0),
            include_frame,
            ..ServerConfig::default()
        },
        ..Config::default()
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1.0
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_stream_reports_solved_then_held_pose() {
    let bound = TelemetryService::new(config(Transport::Tcp, false)).unwrap().bind().await.unwrap();
    let addr = bound.local_addr();

    // Frontal, then pitched down 10°, then a degenerate face that keeps pitch/yaw
    let detector = replay(vec![
        FaceDetectionResult::single(frontal_face()),
        FaceDetectionResult::single(posed_face(10.0, 0.0, 0.0)),
        FaceDetectionResult::single(collinear_face()),
    ]);
    let source = FiniteThenIdle { remaining: 4 };

    let (stop, stopped) = oneshot::channel::<()>();
    let service = tokio::spawn(bound.run(source, detector, async move {
        let _ = stopped.await;
    }));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    let settled = tokio::time::timeout(WAIT, async {
        loop {
            let line = lines.next_line().await.unwrap().expect("server closed the stream");
            let message = PoseMessage::from_json(&line).unwrap();
            assert!(message.frame.is_none());
            if approx(message.pitch, 10.0 * ANGLE_SCALE) && message.roll.abs() < 1e-6 {
                return message;
            }
        }
    })
    .await
    .expect("pose never settled");
    assert!(approx(settled.yaw, 0.0), "yaw {}", settled.yaw);

    stop.send(()).unwrap();
    let stats = tokio::time::timeout(WAIT, service).await.unwrap().unwrap().unwrap();
    assert_eq!(stats.frames, 4);
    assert_eq!(stats.updated, 2);
    assert_eq!(stats.held, 1);
    assert_eq!(stats.no_face, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_stream_carries_frames() {
    let bound = TelemetryService::new(config(Transport::WebSocket, true)).unwrap().bind().await.unwrap();
    let addr = bound.local_addr();

    let detector = replay(vec![FaceDetectionResult::single(frontal_face())]);
    let source = FiniteThenIdle { remaining: 1 };
    let (stop, stopped) = oneshot::channel::<()>();
    let service = tokio::spawn(bound.run(source, detector, async move {
        let _ = stopped.await;
    }));

    let (mut client, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
    let message = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await.expect("server closed").unwrap() {
                Message::Text(text) => return PoseMessage::from_json(&text).unwrap(),
                _ => continue,
            }
        }
    })
    .await
    .expect("no telemetry received");

    assert!(approx(message.pitch, 0.0) && approx(message.yaw, 0.0));
    let frame = message.frame.expect("frames enabled");
    let jpeg = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, frame).unwrap();
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (FRAME_WIDTH, FRAME_HEIGHT));

    stop.send(()).unwrap();
    tokio::time::timeout(WAIT, service).await.unwrap().unwrap().unwrap();

    // Shutdown closes the connection
    let closing = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closing.is_ok());
}

#[tokio::test]
async fn test_empty_detection_keeps_previous_pose_on_the_wire() {
    let state = Arc::new(SharedFrameState::new());
    let registry = Arc::new(ClientRegistry::new());
    let (_, mut rx) = registry.register(SocketAddr::from(([127, 0, 0, 1], 6000)));
    let broadcast =
        BroadcastLoop::new(Arc::clone(&state), Arc::clone(&registry), Duration::from_millis(10)).include_frame(false);

    let detector = replay(vec![
        FaceDetectionResult::single(posed_face(5.0, -3.0, 4.0)),
        FaceDetectionResult::empty(),
    ]);
    let mut capture =
        CaptureLoop::new(FiniteThenIdle { remaining: 2 }, detector, Arc::clone(&state)).include_frame(false);

    assert!(matches!(capture.run_cycle().unwrap(), CycleOutcome::Updated(_)));
    assert!(matches!(broadcast.tick().await.unwrap(), TickOutcome::Sent(report) if report.delivered == 1));
    let first = PoseMessage::from_json(&rx.recv().await.unwrap()).unwrap();
    assert!(approx(first.pitch, 5.0 * ANGLE_SCALE), "pitch {}", first.pitch);
    assert!(approx(first.yaw, -3.0 * ANGLE_SCALE), "yaw {}", first.yaw);

    assert_eq!(capture.run_cycle().unwrap(), CycleOutcome::NoFace);
    assert!(matches!(broadcast.tick().await.unwrap(), TickOutcome::Sent(report) if report.delivered == 1));
    let second = PoseMessage::from_json(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(second.pose(), first.pose());
}

#[tokio::test]
async fn test_service_stops_when_source_closes() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(64, 48).save(dir.path().join("000.png")).unwrap();
    RgbImage::new(64, 48).save(dir.path().join("001.png")).unwrap();
    let source = ImageDirSource::new(dir.path()).unwrap();
    let detector = replay(vec![FaceDetectionResult::empty(), FaceDetectionResult::empty()]);

    let bound = TelemetryService::new(config(Transport::WebSocket, false)).unwrap().bind().await.unwrap();
    let stats = tokio::time::timeout(WAIT, bound.run(source, detector, std::future::pending()))
        .await
        .expect("service did not stop on its own")
        .unwrap();

    assert_eq!(stats.frames, 2);
    assert_eq!(stats.no_face, 2);
    assert_eq!(stats.updated, 0);
}
