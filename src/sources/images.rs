use crate::{
    capture::{FrameGrab, FrameSource},
    Error, Result,
};
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays the images of a directory in file-name order
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    position: usize,
    interval: Option<Duration>,
    last_grab: Option<Instant>,
}

impl ImageDirSource {
    /// Collect the decodable images in `dir`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be read
    /// - It contains no image files
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        log::info!("Opening image directory: {}", dir.display());

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(Error::InvalidInput(format!("No images found in {}", dir.display())));
        }
        files.sort();

        log::info!("Found {} images", files.len());
        Ok(Self::from_files(files))
    }

    #[must_use]
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            position: 0,
            interval: None,
            last_grab: None,
        }
    }

    /// Pace grabs to at most one per `interval`
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = (!interval.is_zero()).then_some(interval);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last_grab) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_grab = Some(Instant::now());
    }
}

impl FrameSource for ImageDirSource {
    fn grab(&mut self) -> Result<FrameGrab> {
        let Some(path) = self.files.get(self.position).cloned() else {
            return Ok(FrameGrab::Closed);
        };
        self.position += 1;
        self.pace();

        match image::open(&path) {
            Ok(image) => Ok(FrameGrab::Frame(image.into_rgb8())),
            Err(e) => {
                log::warn!("Skipping unreadable image {}: {}", path.display(), e);
                Ok(FrameGrab::Retry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_replays_in_name_order_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(8, 6).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(4, 2).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageDirSource::new(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let FrameGrab::Frame(first) = source.grab().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(first.dimensions(), (4, 2));
        let FrameGrab::Frame(second) = source.grab().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(second.dimensions(), (8, 6));
        assert!(matches!(source.grab().unwrap(), FrameGrab::Closed));
    }

    #[test]
    fn test_unreadable_file_is_retry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut source = ImageDirSource::new(dir.path()).unwrap();
        assert!(matches!(source.grab().unwrap(), FrameGrab::Retry));
        assert!(matches!(source.grab().unwrap(), FrameGrab::Closed));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirSource::new(dir.path()).is_err());
        assert!(ImageDirSource::new(dir.path().join("missing")).is_err());
    }
}
