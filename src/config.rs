//! Configuration management for the head pose telemetry service

use crate::{
    constants::{
        DEFAULT_FRAME_BROADCAST_HZ, DEFAULT_FRAME_INTERVAL_MS, DEFAULT_HOST, DEFAULT_JPEG_QUALITY,
        DEFAULT_MIN_DETECTION_CONFIDENCE, DEFAULT_MIN_TRACKING_CONFIDENCE, DEFAULT_POSE_BROADCAST_HZ,
        DEFAULT_RETRY_DELAY_MS, DEFAULT_TCP_PORT, DEFAULT_WEBSOCKET_PORT, DEFAULT_WRITE_TIMEOUT_MS,
        MAX_BROADCAST_RATE_HZ, MAX_TRACKED_FACES, MIN_BROADCAST_PERIOD,
    },
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telemetry server configuration
    pub server: ServerConfig,

    /// Frame source configuration
    pub capture: CaptureConfig,

    /// Landmark detector configuration
    pub detector: DetectorConfig,
}

/// Wire binding for telemetry clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Fan-out to any number of WebSocket clients
    #[default]
    WebSocket,
    /// Newline-delimited JSON to a single TCP client
    Tcp,
}

impl Transport {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::WebSocket => DEFAULT_WEBSOCKET_PORT,
            Self::Tcp => DEFAULT_TCP_PORT,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "tcp" => Ok(Self::Tcp),
            other => Err(Error::ConfigError(format!("Unknown transport: {other}"))),
        }
    }
}

/// Telemetry server parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Which binding to serve
    pub transport: Transport,

    /// Listen host
    pub host: String,

    /// Listen port; transport default when unset
    pub port: Option<u16>,

    /// Broadcast cadence in Hz; 30 with frames, 100 pose-only when unset
    pub broadcast_rate_hz: Option<f64>,

    /// Attach a JPEG of the latest frame to every message
    pub include_frame: bool,

    /// JPEG quality (0-100)
    pub jpeg_quality: u8,

    /// Upper bound on a single point-to-point write
    pub write_timeout_ms: u64,
}

/// Frame source parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Webcam index
    pub camera_index: i32,

    /// Video file to read instead of a camera
    pub video_file: Option<PathBuf>,

    /// Directory of still images to replay instead of a camera
    pub image_dir: Option<PathBuf>,

    /// Pacing of replayed images
    pub frame_interval_ms: u64,

    /// Pause after a failed grab
    pub retry_delay_ms: u64,
}

/// Landmark detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Path to the face mesh ONNX model
    pub model: PathBuf,

    /// Recorded landmarks (JSON lines) to replay instead of running a model
    pub landmarks_file: Option<PathBuf>,

    /// Presence score needed to acquire a face (0.0-1.0)
    pub min_detection_confidence: f32,

    /// Presence score needed to keep tracking a face (0.0-1.0)
    pub min_tracking_confidence: f32,

    /// Maximum number of faces to track (only 1 is supported)
    pub max_faces: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            host: DEFAULT_HOST.to_string(),
            port: None,
            broadcast_rate_hz: None,
            include_frame: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            video_file: None,
            image_dir: None,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("assets/face_landmark.onnx"),
            landmarks_file: None,
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            min_tracking_confidence: DEFAULT_MIN_TRACKING_CONFIDENCE,
            max_faces: MAX_TRACKED_FACES,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }

    #[must_use]
    pub fn effective_broadcast_rate(&self) -> f64 {
        self.broadcast_rate_hz.unwrap_or(if self.include_frame {
            DEFAULT_FRAME_BROADCAST_HZ
        } else {
            DEFAULT_POSE_BROADCAST_HZ
        })
    }

    /// Interval between broadcast ticks, never shorter than [`MIN_BROADCAST_PERIOD`]
    #[must_use]
    pub fn broadcast_period(&self) -> Duration {
        let rate = self.effective_broadcast_rate();
        if !rate.is_finite() || rate <= 0.0 {
            return MIN_BROADCAST_PERIOD;
        }
        Duration::try_from_secs_f64(rate.recip())
            .map_or(MIN_BROADCAST_PERIOD, |period| period.max(MIN_BROADCAST_PERIOD))
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Resolve host and port to a socket address without blocking the runtime
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be resolved.
    pub async fn listen_addr(&self) -> Result<SocketAddr> {
        let port = self.effective_port();
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        tokio::net::lookup_host((self.host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| Error::ConfigError(format!("Host {} did not resolve", self.host)))
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        serde_yaml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        // Validate thresholds
        if !(0.0..=1.0).contains(&self.detector.min_detection_confidence) {
            return Err(Error::ConfigError(
                "Minimum detection confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.min_tracking_confidence) {
            return Err(Error::ConfigError(
                "Minimum tracking confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.detector.max_faces != MAX_TRACKED_FACES {
            return Err(Error::ConfigError(format!(
                "Only {} tracked face is supported, got {}",
                MAX_TRACKED_FACES, self.detector.max_faces
            )));
        }

        // Validate server settings
        if self.server.host.trim().is_empty() {
            return Err(Error::ConfigError("Host must not be empty".to_string()));
        }
        if self.server.jpeg_quality > 100 {
            return Err(Error::ConfigError("JPEG quality must be between 0 and 100".to_string()));
        }
        if let Some(rate) = self.server.broadcast_rate_hz {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(Error::ConfigError("Broadcast rate must be greater than 0".to_string()));
            }
            if rate > MAX_BROADCAST_RATE_HZ {
                return Err(Error::ConfigError(format!(
                    "Broadcast rate must not exceed {MAX_BROADCAST_RATE_HZ} Hz, got {rate}"
                )));
            }
        }
        if self.server.write_timeout_ms == 0 {
            return Err(Error::ConfigError("Write timeout must be greater than 0".to_string()));
        }

        // Validate capture settings
        if self.capture.retry_delay_ms == 0 {
            return Err(Error::ConfigError("Retry delay must be greater than 0".to_string()));
        }
        if self.capture.video_file.is_some() && self.capture.image_dir.is_some() {
            return Err(Error::ConfigError(
                "Only one of video_file and image_dir may be set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Head Pose Telemetry Configuration

# Telemetry server
server:
  transport: websocket      # websocket | tcp
  host: 127.0.0.1
  port: ~                   # 8765 for websocket, 5555 for tcp
  broadcast_rate_hz: ~      # 30 with frames, 100 pose-only
  include_frame: true
  jpeg_quality: 80
  write_timeout_ms: 250

# Frame source
capture:
  camera_index: 0
  video_file: ~
  image_dir: ~
  frame_interval_ms: 33
  retry_delay_ms: 10

# Landmark detector
detector:
  model: assets/face_landmark.onnx
  landmarks_file: ~
  min_detection_confidence: 0.5
  min_tracking_confidence: 0.5
  max_faces: 1
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_matches_defaults() {
        let parsed: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(parsed, Config::default());
        parsed.validate().unwrap();
    }

    #[test]
    fn test_transport_dependent_defaults() {
        let mut server = ServerConfig::default();
        assert_eq!(server.effective_port(), 8765);
        assert!((server.effective_broadcast_rate() - 30.0).abs() < f64::EPSILON);

        server.transport = Transport::Tcp;
        server.include_frame = false;
        assert_eq!(server.effective_port(), 5555);
        assert!((server.effective_broadcast_rate() - 100.0).abs() < f64::EPSILON);
        assert_eq!(server.broadcast_period(), Duration::from_millis(10));

        server.port = Some(9000);
        server.broadcast_rate_hz = Some(50.0);
        assert_eq!(server.effective_port(), 9000);
        assert_eq!(server.broadcast_period(), Duration::from_millis(20));
    }

    #[test]
    fn test_broadcast_period_never_zero() {
        let mut server = ServerConfig {
            broadcast_rate_hz: Some(1e10),
            ..ServerConfig::default()
        };
        assert_eq!(server.broadcast_period(), MIN_BROADCAST_PERIOD);

        server.broadcast_rate_hz = Some(MAX_BROADCAST_RATE_HZ);
        assert_eq!(server.broadcast_period(), Duration::from_millis(1));

        server.broadcast_rate_hz = Some(0.0);
        assert!(!server.broadcast_period().is_zero());
    }

    #[tokio::test]
    async fn test_listen_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.listen_addr().await.unwrap(), "127.0.0.1:8765".parse().unwrap());
    }

    #[tokio::test]
    async fn test_listen_addr_resolves_hostname() {
        let server = ServerConfig {
            host: "localhost".to_string(),
            port: Some(7000),
            ..ServerConfig::default()
        };
        let addr = server.listen_addr().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 7000);
    }

    #[test]
    fn test_transport_parsing() {
        assert_eq!("websocket".parse::<Transport>().unwrap(), Transport::WebSocket);
        assert_eq!("TCP".parse::<Transport>().unwrap(), Transport::Tcp);
        assert!("udp".parse::<Transport>().is_err());
        assert_eq!(Transport::Tcp.to_string(), "tcp");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("server:\n  transport: tcp\n").unwrap();
        assert_eq!(config.server.transport, Transport::Tcp);
        assert_eq!(config.server.jpeg_quality, 80);
        assert_eq!(config.detector.max_faces, 1);
    }
}
