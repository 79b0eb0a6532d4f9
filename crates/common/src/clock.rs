//! Wall-clock source for the scheduler.
//!
//! The scheduler reads "now" through [`Clock`] so that window anchoring and release
//! waits can be driven by tokio's (pausable) timer in tests.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A wall clock pinned to `anchor` at construction that advances with tokio's clock.
///
/// Under `tokio::time::pause()` it moves only when the runtime auto-advances, which
/// makes hour-long release waits deterministic.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    origin: Instant,
}

impl TokioClock {
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.origin.elapsed())
            .ok()
            .and_then(|elapsed| self.anchor.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let anchor = Utc.with_ymd_and_hms(2024, 4, 6, 12, 0, 0).unwrap();
        let clock = TokioClock::starting_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(clock.now(), anchor + TimeDelta::hours(1));
    }
}
