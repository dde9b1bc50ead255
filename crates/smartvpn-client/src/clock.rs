//! Wall-clock abstraction.
//!
//! Certificate timing is expressed in wall-clock time, while timers run on
//! tokio's monotonic clock. [`TokioClock`] ties the two together so that a
//! paused tokio runtime also freezes (and auto-advances) wall-clock time.

use std::time::SystemTime;

use tokio::time::Instant;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Wall clock that starts at `origin` and advances with tokio's clock.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: SystemTime,
    start: Instant,
}

impl TokioClock {
    pub fn new(origin: SystemTime) -> Self {
        Self {
            origin,
            start: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        self.origin + self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let origin = UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = TokioClock::new(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), origin + Duration::from_secs(90));
    }
}
