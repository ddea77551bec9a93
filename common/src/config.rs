use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Prepended to addresses typed without a scheme, e.g. `10.0.0.5` becomes `rtsp://10.0.0.5`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on a single frame read. Must stay below `session.frame_interval_ms`.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_clock_interval")]
    pub clock_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Fixed encoder rate, independent of what the source actually delivers.
    #[serde(default = "default_recording_fps")]
    pub fps: f64,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            rtsp_transport: default_rtsp_transport(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval(),
            clock_interval_ms: default_clock_interval(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            fps: default_recording_fps(),
            container: default_container(),
            codec: default_codec(),
            fourcc: default_fourcc(),
            quality: default_quality(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SessionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session driver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.frame_interval_ms must be greater than zero".into(),
            ));
        }
        if self.session.clock_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.clock_interval_ms must be greater than zero".into(),
            ));
        }
        // A read that outlasts the frame interval would stall the ticker.
        if self.stream.read_timeout_ms >= self.session.frame_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "stream.read_timeout_ms ({}) must be below session.frame_interval_ms ({})",
                self.stream.read_timeout_ms, self.session.frame_interval_ms
            )));
        }
        Ok(())
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::ReadFile(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_scheme() -> String {
    "rtsp".into()
}
fn default_rtsp_transport() -> String {
    "tcp".into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    25
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}
fn default_ffprobe_path() -> String {
    "ffprobe".into()
}
fn default_frame_interval() -> u64 {
    30
}
fn default_clock_interval() -> u64 {
    100
}
fn default_output_dir() -> String {
    "Record".into()
}
fn default_recording_fps() -> f64 {
    20.0
}
fn default_container() -> String {
    "avi".into()
}
fn default_codec() -> String {
    "mpeg4".into()
}
fn default_fourcc() -> String {
    "XVID".into()
}
fn default_quality() -> u32 {
    5
}
fn default_report_interval() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".into()
}
