use std::fmt;

/// Width and height of a frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One decoded image from the stream.
///
/// Pixels are packed row by row, `stride` bytes per row, `channels` bytes per
/// pixel. Frames read from a stream source are 3-channel BGR, the order the
/// decoder emits them in; the display path converts to RGB on its own copy.
#[derive(Debug, Clone)]
pub struct Frame {
    geometry: Geometry,
    channels: u8,
    stride: usize,
    data: Vec<u8>,
    /// Per-source sequence number, starting at 0 on every connection.
    pub seq: u64,
    /// Unix millis at which the frame was pulled from the source.
    pub captured_at_ms: i64,
}

pub const BGR_CHANNELS: u8 = 3;

impl Frame {
    pub fn new(
        geometry: Geometry,
        channels: u8,
        data: Vec<u8>,
        seq: u64,
        captured_at_ms: i64,
    ) -> Result<Self, FrameError> {
        if channels == 0 {
            return Err(FrameError::NoChannels);
        }
        let stride = geometry.width as usize * channels as usize;
        let expected = stride * geometry.height as usize;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                geometry,
                channels,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            geometry,
            channels,
            stride,
            data,
            seq,
            captured_at_ms,
        })
    }

    /// Build a packed 3-channel BGR frame stamped with the current time.
    pub fn bgr(geometry: Geometry, data: Vec<u8>, seq: u64) -> Result<Self, FrameError> {
        Self::new(
            geometry,
            BGR_CHANNELS,
            data,
            seq,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    // -- Convenience accessors --------------------------------------------------

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Channel bytes of the pixel at (`x`, `y`), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let start = y as usize * self.stride + x as usize * self.channels as usize;
        self.data.get(start..start + self.channels as usize)
    }
}

/// Number of bytes a packed frame of `geometry` with `channels` occupies.
pub fn frame_len(geometry: Geometry, channels: u8) -> usize {
    geometry.pixel_count() * channels as usize
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer for {geometry} with {channels} channels must be {expected} bytes, got {got}")]
    SizeMismatch {
        geometry: Geometry,
        channels: u8,
        expected: usize,
        got: usize,
    },
    #[error("frame must have at least one channel")]
    NoChannels,
}
