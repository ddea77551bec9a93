use std::path::PathBuf;
use stream_viewer_common::config::SessionConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::display::PreviewHandle;
use crate::session::StreamSession;

/// Operator requests, one per input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(String),
    Stop,
    StartRecording,
    StopRecording,
    Snapshot(PathBuf),
    Status,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
    #[error("unknown command `{0}` (try start <address>, stop, record, stop-record, snapshot <path>, status, quit)")]
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "start" | "connect" => {
                if rest.is_empty() {
                    Err(CommandError::MissingArgument("start"))
                } else {
                    Ok(Self::Start(rest.to_string()))
                }
            }
            "stop" => Ok(Self::Stop),
            "record" | "rec" | "start-recording" => Ok(Self::StartRecording),
            "stop-record" | "stop-recording" => Ok(Self::StopRecording),
            "snapshot" => {
                if rest.is_empty() {
                    Err(CommandError::MissingArgument("snapshot"))
                } else {
                    Ok(Self::Snapshot(PathBuf::from(rest)))
                }
            }
            "status" => Ok(Self::Status),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Forward operator commands read line by line from `input`. End of input
/// counts as `Quit`.
pub async fn read_commands<R: AsyncRead + Unpin>(input: R, commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read operator input");
                break;
            }
        };
        match Command::parse(&line) {
            Ok(cmd) => {
                if commands.send(cmd).await.is_err() {
                    return;
                }
            }
            Err(CommandError::Empty) => {}
            Err(e) => warn!("{e}"),
        }
    }
    let _ = commands.send(Command::Quit).await;
}

/// Drive `session` until `Quit` arrives or every command sender is gone.
///
/// Frame ticks and clock readouts are two intervals polled from this one
/// task, so a tick never overlaps another tick or a lifecycle command.
pub async fn run(
    session: &mut StreamSession,
    mut commands: mpsc::Receiver<Command>,
    preview: &PreviewHandle,
    config: &SessionConfig,
) {
    let mut frame_ticker = tokio::time::interval(config.frame_interval());
    frame_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut clock_ticker = tokio::time::interval(config.clock_interval());
    clock_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_reported: Option<u64> = None;

    info!(
        frame_interval_ms = config.frame_interval_ms,
        clock_interval_ms = config.clock_interval_ms,
        "session driver running"
    );

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed");
                    break;
                };
                if cmd == Command::Quit {
                    break;
                }
                let was_streaming = session.is_streaming();
                handle_command(session, cmd, preview).await;
                if session.is_streaming() && !was_streaming {
                    frame_ticker.reset();
                    clock_ticker.reset();
                    last_reported = None;
                }
            }
            _ = frame_ticker.tick(), if session.is_streaming() => {
                session.tick().await;
            }
            _ = clock_ticker.tick(), if session.is_streaming() => {
                let secs = session.elapsed_seconds();
                if last_reported != Some(secs) {
                    info!(secs, "stream time: {secs} seconds");
                    last_reported = Some(secs);
                }
            }
        }
    }

    session.stop().await;
    info!("session driver stopped");
}

async fn handle_command(session: &mut StreamSession, cmd: Command, preview: &PreviewHandle) {
    match cmd {
        Command::Start(address) => {
            if let Err(e) = session.start(&address).await {
                error!(error = %e, "cannot open stream");
            }
        }
        Command::Stop => session.stop().await,
        Command::StartRecording => match session.start_recording().await {
            Ok(Some(path)) => info!(path = %path.display(), "recording to file"),
            Ok(None) => info!("nothing to record: not streaming or already recording"),
            Err(e) => error!(error = %e, "recording not started"),
        },
        Command::StopRecording => {
            if session.stop_recording().await.is_none() {
                debug!("no recording was running");
            }
        }
        Command::Snapshot(path) => match preview.save(&path) {
            Ok(geometry) => info!(path = %path.display(), %geometry, "snapshot saved"),
            Err(e) => warn!(error = %e, path = %path.display(), "snapshot failed"),
        },
        Command::Status => {
            let stats = session.stats();
            info!(
                state = ?session.state(),
                url = ?session.address().map(|a| a.to_string()),
                elapsed_secs = session.elapsed_seconds(),
                frames_displayed = stats.frames_displayed,
                frames_recorded = stats.frames_recorded,
                frames_rejected = stats.frames_rejected,
                empty_ticks = stats.empty_ticks,
                closed_ticks = stats.closed_ticks,
                "session status"
            );
        }
        Command::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testing::{FakeConnector, FakeDisplay, FakeRecorderFactory, Journal};
    use std::time::Duration;
    use stream_viewer_common::config::Config;
    use stream_viewer_common::frame::Geometry;

    #[test]
    fn parse_commands() {
        assert_eq!(
            Command::parse("start 10.0.0.5"),
            Ok(Command::Start("10.0.0.5".into()))
        );
        assert_eq!(
            Command::parse("  Connect   rtsp://cam.local/live "),
            Ok(Command::Start("rtsp://cam.local/live".into()))
        );
        assert_eq!(Command::parse("record"), Ok(Command::StartRecording));
        assert_eq!(Command::parse("stop-record"), Ok(Command::StopRecording));
        assert_eq!(Command::parse("STOP"), Ok(Command::Stop));
        assert_eq!(
            Command::parse("snapshot shot.png"),
            Ok(Command::Snapshot(PathBuf::from("shot.png")))
        );
        assert_eq!(Command::parse("q"), Ok(Command::Quit));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert_eq!(
            Command::parse("start"),
            Err(CommandError::MissingArgument("start"))
        );
        assert_eq!(
            Command::parse("rewind"),
            Err(CommandError::Unknown("rewind".into()))
        );
    }

    #[tokio::test]
    async fn input_lines_become_commands() {
        let input: &[u8] = b"start 10.0.0.5\n\nbogus\nrecord\n";
        let (tx, mut rx) = mpsc::channel(8);
        read_commands(input, tx).await;

        assert_eq!(rx.recv().await, Some(Command::Start("10.0.0.5".into())));
        assert_eq!(rx.recv().await, Some(Command::StartRecording));
        assert_eq!(rx.recv().await, Some(Command::Quit));
        assert_eq!(rx.recv().await, None);
    }

    fn session_with(connector: &FakeConnector, recorders: &FakeRecorderFactory) -> StreamSession {
        StreamSession::new(
            &Config::default(),
            Box::new(connector.clone()),
            Box::new(recorders.clone()),
            Box::new(FakeDisplay::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_frame_interval_until_quit() {
        let journal = Journal::default();
        let connector = FakeConnector::new(Geometry::new(4, 4), journal.clone());
        connector.set_endless();
        let recorders = FakeRecorderFactory::new(journal);
        let mut session = session_with(&connector, &recorders);
        let (tx, rx) = mpsc::channel(8);
        let config = SessionConfig::default();
        let preview = PreviewHandle::default();

        let feeder = async {
            tx.send(Command::Start("10.0.0.5".into())).await.unwrap();
            tx.send(Command::StartRecording).await.unwrap();
            tokio::time::sleep(Duration::from_millis(305)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(run(&mut session, rx, &preview, &config), feeder);

        // 30 ms ticks over ~300 ms.
        let recorded = recorders.writes();
        assert!((9..=11).contains(&recorded), "recorded {recorded} frames");
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(connector.open_sources(), 0);
        assert_eq!(recorders.active_sinks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_stops_session() {
        let journal = Journal::default();
        let connector = FakeConnector::new(Geometry::new(4, 4), journal.clone());
        let recorders = FakeRecorderFactory::new(journal);
        let mut session = session_with(&connector, &recorders);
        let (tx, rx) = mpsc::channel(8);

        tx.send(Command::Start("10.0.0.5".into())).await.unwrap();
        drop(tx);
        run(&mut session, rx, &PreviewHandle::default(), &SessionConfig::default()).await;

        assert_eq!(connector.addresses().len(), 1);
        assert_eq!(connector.open_sources(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }
}
