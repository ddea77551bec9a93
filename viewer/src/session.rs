use chrono::Local;
use std::path::{Path, PathBuf};
use stream_viewer_common::config::{Config, RecordingConfig};
use stream_viewer_common::frame::Frame;
use tracing::{debug, error, info, warn};

use crate::clock::SessionClock;
use crate::display::DisplaySink;
use crate::recorder::naming::recording_path;
use crate::recorder::{RecorderFactory, RecordingSink, RecordingSummary, WriteError, WriteOpenError};
use crate::source::{ConnectError, FrameSource, ReadError, SourceConnector, StreamAddress};

/// Lifecycle state as seen by the operator. Recording is a flag on top of
/// streaming, not a separate branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming { recording: bool },
}

/// Counters for the current streaming session, reset by every `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_displayed: u64,
    pub frames_recorded: u64,
    /// Frames the recording refused because their geometry changed.
    pub frames_rejected: u64,
    pub empty_ticks: u64,
    pub closed_ticks: u64,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No source is open; nothing was read.
    Idle,
    Presented { recorded: bool },
    NoFrame,
    SourceClosed,
}

/// One viewer session: a frame source, an optional recording and the
/// session clock, driven one tick at a time.
///
/// All methods take `&mut self`, so ticks and lifecycle operations are
/// strictly sequential. Introducing a second acquisition task would require
/// guarding `source` and `recording` with a lock.
pub struct StreamSession {
    connector: Box<dyn SourceConnector>,
    recorders: Box<dyn RecorderFactory>,
    display: Box<dyn DisplaySink>,
    scheme: String,
    recording_config: RecordingConfig,

    source: Option<Box<dyn FrameSource>>,
    recording: Option<Box<dyn RecordingSink>>,
    address: Option<StreamAddress>,
    clock: SessionClock,
    stats: SessionStats,
    /// Whether the dead-source warning was already logged this session.
    reported_closed: bool,
}

impl StreamSession {
    pub fn new(
        config: &Config,
        connector: Box<dyn SourceConnector>,
        recorders: Box<dyn RecorderFactory>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        Self {
            connector,
            recorders,
            display,
            scheme: config.stream.scheme.clone(),
            recording_config: config.recording.clone(),
            source: None,
            recording: None,
            address: None,
            clock: SessionClock::new(),
            stats: SessionStats::default(),
            reported_closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.source {
            None => SessionState::Idle,
            Some(_) => SessionState::Streaming {
                recording: self.recording.is_some(),
            },
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn address(&self) -> Option<&StreamAddress> {
        self.address.as_ref()
    }

    /// Whole seconds since the last `start`; frozen at the final value after
    /// `stop`, zero if the session never started.
    pub fn elapsed_seconds(&self) -> u64 {
        self.clock.elapsed().as_secs()
    }

    /// Connect to `raw_address` and begin streaming.
    ///
    /// On failure the session is left Idle with nothing held. Starting while
    /// already streaming tears the running session down first.
    pub async fn start(&mut self, raw_address: &str) -> Result<(), ConnectError> {
        let address = StreamAddress::parse(raw_address, &self.scheme)?;

        if self.is_streaming() {
            info!(url = %address, "restarting session on new address");
            self.stop().await;
        }

        info!(url = %address, "connecting to stream");
        let source = match self.connector.open(&address).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, url = %address, "could not open stream, staying idle");
                return Err(e);
            }
        };

        info!(url = %address, geometry = %source.geometry(), "streaming started");
        self.source = Some(source);
        self.address = Some(address);
        self.stats = SessionStats::default();
        self.reported_closed = false;
        self.clock.start();
        Ok(())
    }

    /// Pull at most one frame and route it to the display and, when active,
    /// the recording. Never fails: every problem ends the tick early.
    pub async fn tick(&mut self) -> TickOutcome {
        let Some(source) = self.source.as_mut() else {
            return TickOutcome::Idle;
        };

        let frame = match source.read_frame().await {
            Ok(f) => f,
            Err(ReadError::NoFrame) => {
                self.stats.empty_ticks += 1;
                return TickOutcome::NoFrame;
            }
            Err(ReadError::SourceClosed) => {
                self.stats.closed_ticks += 1;
                if !self.reported_closed {
                    warn!(
                        url = ?self.address.as_ref().map(|a| a.to_string()),
                        "stream source closed; keep ticking until the operator stops the session"
                    );
                    self.reported_closed = true;
                } else {
                    debug!(closed_ticks = self.stats.closed_ticks, "source still closed");
                }
                return TickOutcome::SourceClosed;
            }
        };

        self.display.present(&frame);
        self.stats.frames_displayed += 1;

        let recorded = self.record(&frame).await;
        if self.stats.frames_displayed % 300 == 0 {
            debug!(
                frames_displayed = self.stats.frames_displayed,
                frames_recorded = self.stats.frames_recorded,
                "frames processed"
            );
        }
        TickOutcome::Presented { recorded }
    }

    async fn record(&mut self, frame: &Frame) -> bool {
        let Some(sink) = self.recording.as_mut() else {
            return false;
        };

        match sink.write_frame(frame).await {
            Ok(()) => {
                self.stats.frames_recorded += 1;
                true
            }
            Err(e @ WriteError::GeometryMismatch { .. }) => {
                self.stats.frames_rejected += 1;
                warn!(error = %e, seq = frame.seq, "frame dropped from recording");
                false
            }
            Err(e) => {
                error!(error = %e, seq = frame.seq, "recording broke, finalizing it");
                self.close_recording().await;
                false
            }
        }
    }

    /// Begin recording the stream into a new file.
    ///
    /// Returns the output path, or `None` when there is no open stream or a
    /// recording is already running.
    pub async fn start_recording(&mut self) -> Result<Option<PathBuf>, WriteOpenError> {
        let Some(source) = self.source.as_ref().filter(|s| s.is_open()) else {
            debug!("not streaming, ignoring start recording");
            return Ok(None);
        };
        if self.recording.is_some() {
            debug!("already recording, ignoring start recording");
            return Ok(None);
        }

        let geometry = source.geometry();
        let fps = self.recording_config.fps;
        let path = recording_path(
            Path::new(&self.recording_config.output_dir),
            &Local::now(),
            &self.recording_config.container,
        );

        let sink = match self.recorders.open(&path, geometry, fps).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, path = %path.display(), "could not start recording");
                return Err(e);
            }
        };

        info!(path = %path.display(), %geometry, fps, "recording started");
        self.recording = Some(sink);
        Ok(Some(path))
    }

    /// Finalize the running recording, if any. The output is flushed and
    /// released before this returns.
    pub async fn stop_recording(&mut self) -> Option<RecordingSummary> {
        if self.recording.is_none() {
            debug!("not recording, ignoring stop recording");
        }
        self.close_recording().await
    }

    async fn close_recording(&mut self) -> Option<RecordingSummary> {
        let mut sink = self.recording.take()?;
        match sink.close().await {
            Ok(summary) => {
                info!(
                    path = %summary.path.display(),
                    frames = summary.frames,
                    "recording stopped"
                );
                Some(summary)
            }
            Err(e) => {
                error!(error = %e, frames = sink.frames_written(), "recording did not finalize cleanly");
                None
            }
        }
    }

    /// Tear the session down: recording first, then the source, then the
    /// clock. Every step runs even if an earlier one reported a failure.
    pub async fn stop(&mut self) {
        let was_streaming = self.source.is_some();

        self.close_recording().await;
        if let Some(mut source) = self.source.take() {
            source.close().await;
        }
        if self.clock.is_running() {
            self.clock.stop();
        }

        if was_streaming {
            info!(
                url = ?self.address.as_ref().map(|a| a.to_string()),
                elapsed_secs = self.elapsed_seconds(),
                frames_displayed = self.stats.frames_displayed,
                frames_recorded = self.stats.frames_recorded,
                "streaming stopped"
            );
        }
        self.address = None;
    }
}
