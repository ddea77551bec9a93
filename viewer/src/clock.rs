use std::time::Duration;
use tokio::time::Instant;

/// Elapsed streaming time for one session.
///
/// Readings are whole seconds. After [`SessionClock::stop`] the last reading
/// stays frozen until the next [`SessionClock::start`].
#[derive(Debug, Default)]
pub struct SessionClock {
    started: Option<Instant>,
    frozen: Duration,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.frozen = Duration::ZERO;
    }

    pub fn stop(&mut self) {
        self.frozen = self.elapsed();
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.started {
            Some(start) => Duration::from_secs(start.elapsed().as_secs()),
            None => self.frozen,
        }
    }
}
