pub mod encoder;
pub mod naming;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stream_viewer_common::frame::{Frame, Geometry};

pub use encoder::FfmpegRecorderFactory;

/// What a closed recording produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteOpenError {
    #[error("failed to create output directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to start encoder: {0}")]
    Spawn(String),
    #[error("encoder exited during startup: {0}")]
    Encoder(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("frame is {got}, recording was opened for {expected}")]
    GeometryMismatch { expected: Geometry, got: Geometry },
    #[error("recording is already closed")]
    Closed,
    #[error("failed to write frame to encoder: {0}")]
    Io(String),
    #[error("encoder exited with error: {0}")]
    EncoderFailed(String),
}

/// Creates recording sinks bound to a fixed geometry and frame rate.
#[async_trait]
pub trait RecorderFactory: Send {
    async fn open(
        &mut self,
        path: &Path,
        geometry: Geometry,
        fps: f64,
    ) -> Result<Box<dyn RecordingSink>, WriteOpenError>;
}

#[async_trait]
pub trait RecordingSink: Send {
    fn geometry(&self) -> Geometry;

    fn frames_written(&self) -> u64;

    /// Append one frame. Frames whose geometry differs from the one the sink
    /// was opened with are rejected and leave the sink untouched.
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), WriteError>;

    /// Flush and release the output. Calling it again returns the same summary.
    async fn close(&mut self) -> Result<RecordingSummary, WriteError>;
}
