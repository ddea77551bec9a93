use image::RgbImage;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use stream_viewer_common::frame::{Frame, Geometry};
use tracing::{debug, info};

/// Consumer of frames for on-screen presentation.
///
/// Called once per successful tick. Implementations must not block: the frame
/// is only borrowed for the duration of the call.
pub trait DisplaySink: Send {
    fn present(&mut self, frame: &Frame);
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("no frame has been presented yet")]
    Empty,
    #[error("failed to save preview: {0}")]
    Image(#[from] image::ImageError),
}

/// Shared slot holding the most recently presented frame, converted to RGB.
#[derive(Debug, Clone, Default)]
pub struct PreviewHandle {
    latest: Arc<Mutex<Option<RgbImage>>>,
}

impl PreviewHandle {
    pub fn latest(&self) -> Option<RgbImage> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, image: RgbImage) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(image);
    }

    /// Write the latest frame to `path`; the format follows the extension.
    pub fn save(&self, path: &Path) -> Result<Geometry, PreviewError> {
        let image = self.latest().ok_or(PreviewError::Empty)?;
        image.save(path)?;
        Ok(Geometry::new(image.width(), image.height()))
    }
}

/// Display sink that converts frames for presentation and tracks the
/// presentation rate.
pub struct PreviewSink {
    handle: PreviewHandle,
    report_interval: Duration,
    presented: u64,
    window_start: Instant,
    window_frames: u64,
}

impl PreviewSink {
    pub fn new(report_interval: Duration) -> Self {
        Self {
            handle: PreviewHandle::default(),
            report_interval,
            presented: 0,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    pub fn handle(&self) -> PreviewHandle {
        self.handle.clone()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySink for PreviewSink {
    fn present(&mut self, frame: &Frame) {
        let Some(image) = to_rgb(frame) else {
            debug!(channels = frame.channels(), "unsupported pixel layout, frame not shown");
            return;
        };
        self.handle.replace(image);
        self.presented += 1;
        self.window_frames += 1;

        let window = self.window_start.elapsed();
        if !self.report_interval.is_zero() && window >= self.report_interval {
            let fps = self.window_frames as f64 / window.as_secs_f64();
            info!(
                fps = (fps * 10.0).round() / 10.0,
                geometry = %frame.geometry(),
                presented = self.presented,
                "display rate"
            );
            self.window_start = Instant::now();
            self.window_frames = 0;
        }
    }
}

/// Convert a packed BGR, BGRA or grayscale frame into an RGB image.
pub fn to_rgb(frame: &Frame) -> Option<RgbImage> {
    let channels = frame.channels() as usize;
    let mut rgb = Vec::with_capacity(frame.geometry().pixel_count() * 3);
    match channels {
        1 => {
            for &v in frame.data() {
                rgb.extend_from_slice(&[v, v, v]);
            }
        }
        3 | 4 => {
            for px in frame.data().chunks_exact(channels) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        _ => return None,
    }
    RgbImage::from_raw(frame.width(), frame.height(), rgb)
}
