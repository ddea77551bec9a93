//! In-memory stand-ins for the stream, recorder and display seams.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use stream_viewer_common::frame::{frame_len, Frame, Geometry, BGR_CHANNELS};

use crate::display::DisplaySink;
use crate::recorder::{RecorderFactory, RecordingSink, RecordingSummary, WriteError, WriteOpenError};
use crate::source::{ConnectError, FrameSource, ReadError, SourceConnector, StreamAddress};

pub fn frame(geometry: Geometry, seq: u64) -> Frame {
    Frame::bgr(geometry, vec![0; frame_len(geometry, BGR_CHANNELS)], seq).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SourceOpened,
    SourceClosed,
    SinkOpened,
    SinkClosed,
}

/// Ordered record of resource transitions across all fakes.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

/// What the next `read_frame` returns.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Frame(Geometry),
    Empty,
    /// The source dies; every later read reports it closed.
    Closed,
}

#[derive(Default)]
struct ConnectorState {
    script: VecDeque<Step>,
    endless: bool,
    addresses: Vec<String>,
    open_sources: usize,
    fail_next_open: bool,
}

#[derive(Clone)]
pub struct FakeConnector {
    geometry: Geometry,
    state: Arc<Mutex<ConnectorState>>,
    journal: Journal,
}

impl FakeConnector {
    pub fn new(geometry: Geometry, journal: Journal) -> Self {
        Self {
            geometry,
            state: Arc::default(),
            journal,
        }
    }

    pub fn push(&self, step: Step) {
        self.state.lock().unwrap().script.push_back(step);
    }

    pub fn push_frames(&self, n: usize) {
        for _ in 0..n {
            self.push(Step::Frame(self.geometry));
        }
    }

    /// Once the script runs out, every read yields a frame.
    pub fn set_endless(&self) {
        self.state.lock().unwrap().endless = true;
    }

    pub fn fail_next_open(&self) {
        self.state.lock().unwrap().fail_next_open = true;
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.lock().unwrap().addresses.clone()
    }

    pub fn open_sources(&self) -> usize {
        self.state.lock().unwrap().open_sources
    }
}

#[async_trait]
impl SourceConnector for FakeConnector {
    async fn open(&mut self, address: &StreamAddress) -> Result<Box<dyn FrameSource>, ConnectError> {
        let mut state = self.state.lock().unwrap();
        state.addresses.push(address.to_string());
        if std::mem::take(&mut state.fail_next_open) {
            return Err(ConnectError::Probe {
                url: address.to_string(),
                reason: "connection refused".into(),
            });
        }
        state.open_sources += 1;
        self.journal.push(Event::SourceOpened);
        Ok(Box::new(FakeSource {
            geometry: self.geometry,
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            open: true,
            dead: false,
            seq: 0,
        }))
    }
}

struct FakeSource {
    geometry: Geometry,
    state: Arc<Mutex<ConnectorState>>,
    journal: Journal,
    open: bool,
    dead: bool,
    seq: u64,
}

#[async_trait]
impl FrameSource for FakeSource {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_frame(&mut self) -> Result<Frame, ReadError> {
        assert!(self.open, "read attempted on a closed source");
        if self.dead {
            return Err(ReadError::SourceClosed);
        }
        let step = {
            let mut state = self.state.lock().unwrap();
            match state.script.pop_front() {
                Some(step) => step,
                None if state.endless => Step::Frame(self.geometry),
                None => Step::Empty,
            }
        };
        match step {
            Step::Frame(geometry) => {
                let f = frame(geometry, self.seq);
                self.seq += 1;
                Ok(f)
            }
            Step::Empty => Err(ReadError::NoFrame),
            Step::Closed => {
                self.dead = true;
                Err(ReadError::SourceClosed)
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().unwrap().open_sources -= 1;
            self.journal.push(Event::SourceClosed);
        }
    }
}

#[derive(Default)]
struct RecorderState {
    opened: Vec<(PathBuf, Geometry, f64)>,
    writes: u64,
    rejected: u64,
    closes: u32,
    active: usize,
    fail_next_open: bool,
    fail_writes: bool,
    fail_close: bool,
}

#[derive(Clone)]
pub struct FakeRecorderFactory {
    state: Arc<Mutex<RecorderState>>,
    journal: Journal,
}

impl FakeRecorderFactory {
    pub fn new(journal: Journal) -> Self {
        Self {
            state: Arc::default(),
            journal,
        }
    }

    pub fn fail_next_open(&self) {
        self.state.lock().unwrap().fail_next_open = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    pub fn opened(&self) -> Vec<(PathBuf, Geometry, f64)> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn writes(&self) -> u64 {
        self.state.lock().unwrap().writes
    }

    pub fn rejected(&self) -> u64 {
        self.state.lock().unwrap().rejected
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn active_sinks(&self) -> usize {
        self.state.lock().unwrap().active
    }
}

#[async_trait]
impl RecorderFactory for FakeRecorderFactory {
    async fn open(
        &mut self,
        path: &Path,
        geometry: Geometry,
        fps: f64,
    ) -> Result<Box<dyn RecordingSink>, WriteOpenError> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_open) {
            return Err(WriteOpenError::Spawn("codec unavailable".into()));
        }
        state.opened.push((path.to_path_buf(), geometry, fps));
        state.active += 1;
        self.journal.push(Event::SinkOpened);
        Ok(Box::new(FakeSink {
            state: Arc::clone(&self.state),
            journal: self.journal.clone(),
            path: path.to_path_buf(),
            geometry,
            frames: 0,
            open: true,
        }))
    }
}

struct FakeSink {
    state: Arc<Mutex<RecorderState>>,
    journal: Journal,
    path: PathBuf,
    geometry: Geometry,
    frames: u64,
    open: bool,
}

#[async_trait]
impl RecordingSink for FakeSink {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), WriteError> {
        let mut state = self.state.lock().unwrap();
        if frame.geometry() != self.geometry {
            state.rejected += 1;
            return Err(WriteError::GeometryMismatch {
                expected: self.geometry,
                got: frame.geometry(),
            });
        }
        if !self.open {
            return Err(WriteError::Closed);
        }
        if state.fail_writes {
            return Err(WriteError::Io("broken pipe".into()));
        }
        state.writes += 1;
        self.frames += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<RecordingSummary, WriteError> {
        if self.open {
            self.open = false;
            let mut state = self.state.lock().unwrap();
            state.active -= 1;
            state.closes += 1;
            self.journal.push(Event::SinkClosed);
            if state.fail_close {
                return Err(WriteError::EncoderFailed("muxer error".into()));
            }
        }
        Ok(RecordingSummary {
            path: self.path.clone(),
            frames: self.frames,
        })
    }
}

/// Counts presented frames.
#[derive(Debug, Clone, Default)]
pub struct FakeDisplay(Arc<AtomicU64>);

impl FakeDisplay {
    pub fn presented(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl DisplaySink for FakeDisplay {
    fn present(&mut self, _frame: &Frame) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
