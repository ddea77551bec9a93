pub mod ffmpeg;

use async_trait::async_trait;
use std::fmt;
use stream_viewer_common::frame::{Frame, Geometry};

pub use ffmpeg::FfmpegConnector;

/// Transport URL of the stream a session connects to.
///
/// Operators may type either a bare host (`10.0.0.5`, `cam.local:8554/live`)
/// or a full URL; bare hosts get the configured scheme prepended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAddress(String);

impl StreamAddress {
    pub fn parse(raw: &str, scheme: &str) -> Result<Self, ConnectError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConnectError::EmptyAddress);
        }
        if raw.contains("://") {
            Ok(Self(raw.to_string()))
        } else {
            Ok(Self(format!("{scheme}://{raw}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme part of the URL, lowercased.
    pub fn scheme(&self) -> String {
        self.0
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("stream address is empty")]
    EmptyAddress,
    #[error("failed to probe stream {url}: {reason}")]
    Probe { url: String, reason: String },
    #[error("stream {0} has no video track")]
    NoVideoStream(String),
    #[error("failed to spawn decoder: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Nothing complete arrived within the read window; skip this tick.
    #[error("no frame available")]
    NoFrame,
    #[error("frame source is closed")]
    SourceClosed,
}

/// Opens connections to stream endpoints.
#[async_trait]
pub trait SourceConnector: Send {
    async fn open(&mut self, address: &StreamAddress) -> Result<Box<dyn FrameSource>, ConnectError>;
}

/// A live connection that yields decoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Frame geometry the connection was negotiated with.
    fn geometry(&self) -> Geometry;

    fn is_open(&self) -> bool;

    /// Single, non-retrying attempt to pull the next frame. Must return within
    /// roughly one tick interval.
    async fn read_frame(&mut self) -> Result<Frame, ReadError>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&mut self);
}
