mod clock;
mod display;
mod driver;
mod recorder;
mod session;
mod source;
#[cfg(test)]
mod testing;

use display::PreviewSink;
use driver::Command;
use recorder::FfmpegRecorderFactory;
use session::StreamSession;
use source::FfmpegConnector;
use std::path::PathBuf;
use std::time::Duration;
use stream_viewer_common::config::Config;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("viewer.toml"));
    let initial_address = args.next();

    let config = match Config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        scheme = config.stream.scheme,
        output_dir = config.recording.output_dir,
        recording_fps = config.recording.fps,
        frame_interval_ms = config.session.frame_interval_ms,
        "starting stream viewer"
    );

    // Decoding and recording both shell out to ffmpeg.
    recorder::encoder::check_ffmpeg_available(&config.stream.ffmpeg_path).await;

    let preview = PreviewSink::new(Duration::from_secs(config.display.report_interval_secs));
    let preview_handle = preview.handle();
    let mut session = StreamSession::new(
        &config,
        Box::new(FfmpegConnector::new(config.stream.clone())),
        Box::new(FfmpegRecorderFactory::new(
            config.stream.ffmpeg_path.clone(),
            config.recording.clone(),
        )),
        Box::new(preview),
    );

    let (tx, rx) = mpsc::channel(16);
    if let Some(address) = initial_address {
        let _ = tx.send(Command::Start(address)).await;
    }

    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        let _ = ctrl_c_tx.send(Command::Quit).await;
    });
    tokio::spawn(driver::read_commands(tokio::io::stdin(), tx));

    info!("commands: start <address>, stop, record, stop-record, snapshot <path>, status, quit");
    driver::run(&mut session, rx, &preview_handle, &config.session).await;
}
