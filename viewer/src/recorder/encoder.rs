use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use stream_viewer_common::config::RecordingConfig;
use stream_viewer_common::frame::{Frame, Geometry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{RecorderFactory, RecordingSink, RecordingSummary, WriteError, WriteOpenError};

/// An encoder still running after this long accepted its arguments.
const STARTUP_SETTLE: Duration = Duration::from_millis(250);
/// How long ffmpeg gets to flush and mux once its input is closed.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(30);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);
/// Bytes of encoder stderr kept for error reports.
const STDERR_TAIL: usize = 4096;

/// Spawns one ffmpeg encoder per recording.
pub struct FfmpegRecorderFactory {
    ffmpeg_path: String,
    config: RecordingConfig,
}

impl FfmpegRecorderFactory {
    pub fn new(ffmpeg_path: impl Into<String>, config: RecordingConfig) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            config,
        }
    }
}

#[async_trait]
impl RecorderFactory for FfmpegRecorderFactory {
    async fn open(
        &mut self,
        path: &Path,
        geometry: Geometry,
        fps: f64,
    ) -> Result<Box<dyn RecordingSink>, WriteOpenError> {
        let encoder = FfmpegEncoder::start(&self.ffmpeg_path, &self.config, path, geometry, fps).await?;
        Ok(Box::new(encoder))
    }
}

struct EncoderProcess {
    child: Child,
    stdin: ChildStdin,
    stderr: JoinHandle<String>,
}

/// An ffmpeg child fed raw BGR frames on stdin.
pub struct FfmpegEncoder {
    /// `None` once the recording has been closed.
    process: Option<EncoderProcess>,
    output_path: PathBuf,
    geometry: Geometry,
    frame_count: u64,
    finalize_timeout: Duration,
}

impl FfmpegEncoder {
    pub async fn start(
        ffmpeg_path: &str,
        config: &RecordingConfig,
        output_path: &Path,
        geometry: Geometry,
        fps: f64,
    ) -> Result<Self, WriteOpenError> {
        if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| WriteOpenError::CreateDir(dir.display().to_string(), e))?;
        }

        let output = output_path
            .to_str()
            .ok_or_else(|| WriteOpenError::Spawn("output path is not valid UTF-8".into()))?;
        let size = geometry.to_string();
        let fps_str = fps.to_string();
        let quality = config.quality.to_string();

        let mut cmd = Command::new(ffmpeg_path);
        cmd.args([
            "-nostdin",
            "-loglevel", "error",
            "-f", "rawvideo",
            "-pix_fmt", "bgr24",
            "-s", &size,
            "-r", &fps_str,
            "-i", "pipe:0",
            "-c:v", &config.codec,
        ]);
        if !config.fourcc.is_empty() {
            cmd.args(["-vtag", &config.fourcc]);
        }
        cmd.args(["-q:v", &quality, "-y", output])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| WriteOpenError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WriteOpenError::Spawn("could not get stdin handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WriteOpenError::Spawn("could not get stderr handle".into()))?;
        let stderr = tokio::spawn(drain_stderr(stderr));

        // A rejected codec, tag or output path makes ffmpeg quit before it
        // reads any input. stdin is already taken, so waiting leaves it open.
        match timeout(STARTUP_SETTLE, child.wait()).await {
            Err(_) => {}
            Ok(Ok(status)) => {
                let stderr = collect_stderr(stderr).await;
                error!(
                    %status,
                    stderr = %stderr,
                    output = %output_path.display(),
                    "ffmpeg encoder exited during startup"
                );
                return Err(WriteOpenError::Encoder(if stderr.is_empty() {
                    status.to_string()
                } else {
                    stderr
                }));
            }
            Ok(Err(e)) => return Err(WriteOpenError::Spawn(e.to_string())),
        }

        debug!(
            codec = config.codec,
            fourcc = config.fourcc,
            %geometry,
            fps,
            output = %output_path.display(),
            "ffmpeg encoder started"
        );

        Ok(Self {
            process: Some(EncoderProcess {
                child,
                stdin,
                stderr,
            }),
            output_path: output_path.to_path_buf(),
            geometry,
            frame_count: 0,
            finalize_timeout: FINALIZE_TIMEOUT,
        })
    }

    fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            path: self.output_path.clone(),
            frames: self.frame_count,
        }
    }
}

#[async_trait]
impl RecordingSink for FfmpegEncoder {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), WriteError> {
        if frame.geometry() != self.geometry {
            return Err(WriteError::GeometryMismatch {
                expected: self.geometry,
                got: frame.geometry(),
            });
        }
        let Some(process) = self.process.as_mut() else {
            return Err(WriteError::Closed);
        };
        process
            .stdin
            .write_all(frame.data())
            .await
            .map_err(|e| WriteError::Io(e.to_string()))?;
        self.frame_count += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<RecordingSummary, WriteError> {
        let Some(EncoderProcess {
            mut child,
            mut stdin,
            stderr,
        }) = self.process.take()
        else {
            return Ok(self.summary());
        };

        if let Err(e) = stdin.flush().await {
            warn!(error = %e, "failed to flush encoder input");
        }
        // Closing stdin tells ffmpeg there are no more frames.
        drop(stdin);

        let status = match timeout(self.finalize_timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(WriteError::EncoderFailed(e.to_string())),
            Err(_) => {
                error!(
                    timeout = ?self.finalize_timeout,
                    path = %self.output_path.display(),
                    "ffmpeg did not finish, killing it"
                );
                let _ = child.start_kill();
                if timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                    warn!("ffmpeg encoder did not exit after kill");
                }
                stderr.abort();
                return Err(WriteError::EncoderFailed(format!(
                    "encoder did not finish within {:?}",
                    self.finalize_timeout
                )));
            }
        };

        let stderr = collect_stderr(stderr).await;
        if !status.success() {
            error!(%status, stderr = %stderr, path = %self.output_path.display(), "ffmpeg exited with error");
            return Err(WriteError::EncoderFailed(if stderr.is_empty() {
                status.to_string()
            } else {
                stderr
            }));
        }
        if !stderr.is_empty() {
            warn!(stderr = %stderr, "ffmpeg reported problems while encoding");
        }

        info!(
            frames = self.frame_count,
            path = %self.output_path.display(),
            "recording finalized"
        );
        Ok(self.summary())
    }
}

/// Read encoder stderr to the end so ffmpeg never blocks on a full pipe,
/// keeping only the last `STDERR_TAIL` bytes.
async fn drain_stderr(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL {
                    tail.drain(..tail.len() - STDERR_TAIL);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

/// The drained stderr of an exited encoder. Empty if a leftover process
/// still holds the pipe open.
async fn collect_stderr(drain: JoinHandle<String>) -> String {
    match timeout(REAP_TIMEOUT, drain).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!(error = %e, "stderr reader failed");
            String::new()
        }
        Err(_) => String::new(),
    }
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(ffmpeg_path: &str) {
    match Command::new(ffmpeg_path).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; streaming and recording may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                ffmpeg = ffmpeg_path,
                "ffmpeg not found; streams cannot be decoded or recorded. \
                 Install ffmpeg or set stream.ffmpeg_path."
            );
        }
    }
}
