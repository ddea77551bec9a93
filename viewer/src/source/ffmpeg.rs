use async_trait::async_trait;
use bytes::BytesMut;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use stream_viewer_common::config::StreamConfig;
use stream_viewer_common::frame::{frame_len, Frame, Geometry, BGR_CHANNELS};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConnectError, FrameSource, ReadError, SourceConnector, StreamAddress};

const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects to streams by probing them with ffprobe and decoding them with an
/// ffmpeg child that writes raw BGR frames to its stdout.
pub struct FfmpegConnector {
    config: StreamConfig,
}

impl FfmpegConnector {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    fn transport_args(&self, address: &StreamAddress) -> Vec<String> {
        if address.scheme() == "rtsp" {
            vec!["-rtsp_transport".into(), self.config.rtsp_transport.clone()]
        } else {
            Vec::new()
        }
    }

    async fn probe(&self, address: &StreamAddress) -> Result<Geometry, ConnectError> {
        let url = address.to_string();
        let mut cmd = Command::new(&self.config.ffprobe_path);
        cmd.args(["-v", "error"])
            .args(self.transport_args(address))
            .args([
                "-select_streams", "v:0",
                "-show_entries", "stream=width,height",
                "-of", "json",
                &url,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.connect_timeout(), cmd.output())
            .await
            .map_err(|_| ConnectError::Probe {
                url: url.clone(),
                reason: format!("timed out after {:?}", self.config.connect_timeout()),
            })?
            .map_err(|e| ConnectError::Probe {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConnectError::Probe {
                url,
                reason: stderr.trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout, &url)
    }
}

#[async_trait]
impl SourceConnector for FfmpegConnector {
    async fn open(&mut self, address: &StreamAddress) -> Result<Box<dyn FrameSource>, ConnectError> {
        let geometry = self.probe(address).await?;
        info!(url = %address, %geometry, "stream probed");

        let url = address.to_string();
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.args(["-nostdin", "-loglevel", "error", "-fflags", "nobuffer"])
            .args(self.transport_args(address))
            .args([
                "-i", &url,
                "-an",
                "-f", "rawvideo",
                "-pix_fmt", "bgr24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ConnectError::Spawn(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConnectError::Spawn("could not get stdout handle".into()))?;

        debug!(
            url = %address,
            pid = child.id(),
            read_timeout_ms = self.config.read_timeout_ms,
            "ffmpeg decoder started"
        );

        Ok(Box::new(FfmpegSource {
            child: Some(child),
            reader: Some(RawFrameReader::new(
                stdout,
                geometry,
                self.config.read_timeout(),
            )),
            geometry,
        }))
    }
}

/// An open ffmpeg decoder process.
pub struct FfmpegSource {
    child: Option<Child>,
    reader: Option<RawFrameReader<ChildStdout>>,
    geometry: Geometry,
}

#[async_trait]
impl FrameSource for FfmpegSource {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn is_open(&self) -> bool {
        self.child.is_some()
    }

    async fn read_frame(&mut self) -> Result<Frame, ReadError> {
        match self.reader.as_mut() {
            Some(reader) => reader.next_frame().await,
            None => Err(ReadError::SourceClosed),
        }
    }

    async fn close(&mut self) {
        // Dropping the pipe first unblocks an ffmpeg stuck on a full stdout.
        self.reader = None;
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "ffmpeg decoder already exited");
        }
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "ffmpeg decoder exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to reap ffmpeg decoder"),
            Err(_) => warn!("ffmpeg decoder did not exit in time, leaving it to kill_on_drop"),
        }
    }
}

/// Cuts fixed-size raw frames out of a byte stream.
///
/// Partial frames stay buffered across calls, so a read window that expires
/// mid-frame loses nothing.
struct RawFrameReader<R> {
    reader: R,
    buffer: BytesMut,
    geometry: Geometry,
    frame_len: usize,
    read_timeout: Duration,
    next_seq: u64,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin> RawFrameReader<R> {
    fn new(reader: R, geometry: Geometry, read_timeout: Duration) -> Self {
        let frame_len = frame_len(geometry, BGR_CHANNELS);
        Self {
            reader,
            buffer: BytesMut::with_capacity(frame_len),
            geometry,
            frame_len,
            read_timeout,
            next_seq: 0,
            exhausted: false,
        }
    }

    async fn next_frame(&mut self) -> Result<Frame, ReadError> {
        if self.exhausted {
            return Err(ReadError::SourceClosed);
        }

        let deadline = Instant::now() + self.read_timeout;
        while self.buffer.len() < self.frame_len {
            self.buffer.reserve(self.frame_len - self.buffer.len());
            match tokio::time::timeout_at(deadline, self.reader.read_buf(&mut self.buffer)).await {
                Err(_) => return Err(ReadError::NoFrame),
                Ok(Ok(0)) => {
                    debug!(buffered = self.buffer.len(), "decoder output ended");
                    self.exhausted = true;
                    return Err(ReadError::SourceClosed);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "failed to read decoder output");
                    self.exhausted = true;
                    return Err(ReadError::SourceClosed);
                }
            }
        }

        let data = self.buffer.split_to(self.frame_len).to_vec();
        let seq = self.next_seq;
        self.next_seq += 1;
        // Length was checked above, so this only fails on a logic error.
        Frame::bgr(self.geometry, data, seq).map_err(|e| {
            warn!(error = %e, "dropping malformed frame");
            ReadError::NoFrame
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_probe_output(stdout: &[u8], url: &str) -> Result<Geometry, ConnectError> {
    let output: ProbeOutput = serde_json::from_slice(stdout).map_err(|e| ConnectError::Probe {
        url: url.to_string(),
        reason: format!("unreadable ffprobe output: {e}"),
    })?;

    output
        .streams
        .iter()
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Geometry::new(w, h)),
            _ => None,
        })
        .ok_or_else(|| ConnectError::NoVideoStream(url.to_string()))
}
