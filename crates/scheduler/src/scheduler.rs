//! Release scheduler: the window, wait and deliver loop.
//!
//! Each pass opens a window anchored at the current anchor, fetches the releases
//! inside it, then walks them in time order: sleep until the release instant,
//! deliver, respect the channel's spacing and quota.
//!
//! Recovery rules:
//! - Catalog failures keep the window untouched and retry after a cool-down, so
//!   nothing that became due in the meantime is skipped.
//! - Delivery failures rewind the anchor to just before the failed release and
//!   restart the pass after a cool-down. The failed release and everything after it
//!   is fetched again; releases after it that were already posted in an earlier pass
//!   can be posted twice. There is no delivery log to prevent that.
//! - A fully drained window re-anchors at "now", never at the old window's end.
//!
//! Every wait is a cancellable timed wait. State lives in memory only: a restart
//! begins from the present and does not back-fill.

use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use airwatch_catalog::ReleaseSource;
use airwatch_common::clock::{Clock, SystemClock};
use airwatch_common::config::AppConfig;
use airwatch_common::error::{SinkError, SourceError};
use airwatch_common::types::{NotificationItem, TimeWindow};
use airwatch_notifier::Notifier;

/// Longest single sleep while waiting for a release; the clock is re-read after each.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(300);

/// Timing policy for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Length of each catalog window.
    pub window_length: TimeDelta,
    /// Pause before retrying a failed catalog fetch.
    pub source_cooldown: Duration,
    /// Pause before re-fetching after a failed delivery.
    pub sink_cooldown: Duration,
    /// Pause before reopening a window that contained no releases.
    pub idle_poll: Duration,
    /// How far before a failed release the anchor is rewound.
    pub rewind_offset: TimeDelta,
    /// Upper bound of one sleep slice while waiting for a release.
    pub max_sleep_slice: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_length: TimeDelta::hours(24),
            source_cooldown: Duration::from_secs(60),
            sink_cooldown: Duration::from_secs(30),
            idle_poll: Duration::from_secs(60),
            rewind_offset: TimeDelta::seconds(1),
            max_sleep_slice: MAX_SLEEP_SLICE,
        }
    }
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            window_length: config.window_length(),
            source_cooldown: config.source_cooldown(),
            sink_cooldown: config.sink_cooldown(),
            idle_poll: config.idle_poll(),
            ..Self::default()
        }
    }
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    OpeningWindow,
    WaitingForSource,
    IteratingItems,
    WaitingForRelease,
    Delivering,
    WindowExhausted,
    /// Stopped by cancellation.
    Stopped,
    /// Stopped by an unrecoverable error.
    FatalStop,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::OpeningWindow => write!(f, "opening_window"),
            SchedulerState::WaitingForSource => write!(f, "waiting_for_source"),
            SchedulerState::IteratingItems => write!(f, "iterating_items"),
            SchedulerState::WaitingForRelease => write!(f, "waiting_for_release"),
            SchedulerState::Delivering => write!(f, "delivering"),
            SchedulerState::WindowExhausted => write!(f, "window_exhausted"),
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::FatalStop => write!(f, "fatal_stop"),
        }
    }
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub windows_opened: u64,
    pub source_retries: u64,
    pub delivered: u64,
    pub rate_limited: u64,
    pub rewinds: u64,
}

/// Unrecoverable loop failures. The process should exit non-zero.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Catalog failure: {0}")]
    Source(#[from] SourceError),

    #[error("Notification failure: {0}")]
    Sink(#[from] SinkError),
}

/// Why a pass stopped early.
enum Halt {
    Cancelled,
    Fatal(SchedulerError),
}

impl From<SourceError> for Halt {
    fn from(e: SourceError) -> Self {
        Halt::Fatal(e.into())
    }
}

impl From<SinkError> for Halt {
    fn from(e: SinkError) -> Self {
        Halt::Fatal(e.into())
    }
}

/// How a batch of releases ended.
enum BatchOutcome {
    /// Every release was delivered.
    Exhausted,
    /// A delivery failed; the next window opens at `anchor`.
    Rewound { anchor: DateTime<Utc> },
}

/// The release scheduler.
pub struct Scheduler<S, N, C = SystemClock> {
    source: S,
    notifier: N,
    clock: C,
    config: SchedulerConfig,
    cancel: CancellationToken,
    state: SchedulerState,
    stats: RunStats,
}

impl<S, N, C> Scheduler<S, N, C>
where
    S: ReleaseSource,
    N: Notifier,
    C: Clock,
{
    pub fn new(
        source: S,
        notifier: N,
        clock: C,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            notifier,
            clock,
            config,
            cancel,
            state: SchedulerState::Idle,
            stats: RunStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Run until the cancellation token fires (`Ok`) or an unrecoverable error occurs.
    pub async fn run(&mut self) -> Result<RunStats, SchedulerError> {
        let mut anchor = self.clock.now();

        tracing::info!(
            source = self.source.name(),
            notifier = self.notifier.name(),
            window_hours = self.config.window_length.num_hours(),
            "Release scheduler started"
        );

        let result = loop {
            match self.run_pass(anchor).await {
                Ok(next) => anchor = next,
                Err(Halt::Cancelled) => break Ok(self.stats),
                Err(Halt::Fatal(e)) => break Err(e),
            }
        };

        match &result {
            Ok(stats) => {
                self.transition(SchedulerState::Stopped);
                tracing::info!(
                    windows = stats.windows_opened,
                    delivered = stats.delivered,
                    rewinds = stats.rewinds,
                    source_retries = stats.source_retries,
                    "Release scheduler stopped"
                );
            }
            Err(e) => {
                self.transition(SchedulerState::FatalStop);
                tracing::error!(critical = true, error = %e, "CRITICAL ERROR, closing");
            }
        }

        result
    }

    /// Open one window at `anchor`, fetch it and drain it. Returns the next anchor.
    async fn run_pass(&mut self, anchor: DateTime<Utc>) -> Result<DateTime<Utc>, Halt> {
        self.transition(SchedulerState::OpeningWindow);
        let window = TimeWindow::opening_at(anchor, self.config.window_length);
        self.stats.windows_opened += 1;
        tracing::info!(start = %window.start, end = %window.end, "Checking for new releases");

        let items = self.fetch_with_retry(window).await?;

        if items.is_empty() {
            self.transition(SchedulerState::WindowExhausted);
            tracing::debug!(
                idle_secs = self.config.idle_poll.as_secs(),
                "No releases in window, checking again later"
            );
            self.pause(self.config.idle_poll).await?;
            return Ok(self.clock.now());
        }

        match self.drain(items).await? {
            BatchOutcome::Exhausted => {
                tracing::debug!(
                    hours = self.config.window_length.num_hours(),
                    "Window drained, checking for new releases in the next {} hours",
                    self.config.window_length.num_hours()
                );
                Ok(self.clock.now())
            }
            BatchOutcome::Rewound { anchor } => Ok(anchor),
        }
    }

    /// Fetch `window`, retrying recoverable failures with the very same window.
    async fn fetch_with_retry(
        &mut self,
        window: TimeWindow,
    ) -> Result<Vec<NotificationItem>, Halt> {
        loop {
            self.transition(SchedulerState::WaitingForSource);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                result = self.source.fetch(window) => result,
            };

            match result {
                Ok(items) => {
                    tracing::info!(items = items.len(), window = %window, "Fetched releases");
                    return Ok(items);
                }
                Err(e) if e.is_recoverable() => {
                    self.stats.source_retries += 1;
                    let cooldown = self.config.source_cooldown;
                    tracing::warn!(
                        error = %e,
                        cooldown_secs = cooldown.as_secs(),
                        "{e}. Retrying in {} seconds.",
                        cooldown.as_secs()
                    );
                    self.pause(cooldown).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Deliver `items` in order, waiting for each release instant.
    async fn drain(&mut self, items: Vec<NotificationItem>) -> Result<BatchOutcome, Halt> {
        self.transition(SchedulerState::IteratingItems);

        for item in &items {
            self.wait_for_release(item).await?;

            self.transition(SchedulerState::Delivering);
            tracing::info!(
                title = %item.title,
                episode = item.episode,
                "{} releasing. Posting to {}",
                item.title,
                self.notifier.name()
            );

            // A delivery in flight is allowed to finish; cancellation is observed
            // at the next suspension point.
            let outcome = match self.notifier.deliver(item).await {
                Ok(outcome) if !outcome.is_delivered() => {
                    let reason = format!("{}: message {outcome}", self.notifier.name());
                    return self.rewind(item, &reason).await;
                }
                Ok(outcome) => outcome,
                Err(e) if e.is_recoverable() => {
                    return self.rewind(item, &e.to_string()).await;
                }
                Err(e) => return Err(e.into()),
            };

            self.stats.delivered += 1;
            tracing::debug!(title = %item.title, outcome = %outcome, "Delivered");

            self.pause(self.notifier.min_spacing()).await?;

            if let Some(retry_after) = outcome.retry_after() {
                self.stats.rate_limited += 1;
                tracing::warn!(
                    retry_after_secs = retry_after.as_secs(),
                    "{} API limit reached. Sleeping for {} seconds.",
                    self.notifier.name(),
                    retry_after.as_secs()
                );
                self.pause(retry_after).await?;
            }

            self.transition(SchedulerState::IteratingItems);
        }

        self.transition(SchedulerState::WindowExhausted);
        Ok(BatchOutcome::Exhausted)
    }

    /// Sleep until `item` is due, in slices so a jumping wall clock is noticed.
    async fn wait_for_release(&mut self, item: &NotificationItem) -> Result<(), Halt> {
        let mut announced = false;

        loop {
            let now = self.clock.now();
            if item.scheduled_at <= now {
                return Ok(());
            }

            if !announced {
                self.transition(SchedulerState::WaitingForRelease);
                tracing::info!(
                    release_at = %item.scheduled_at,
                    title = %item.title,
                    "Waiting for next release(s) at {}",
                    item.scheduled_at.with_timezone(&Local).format("%I:%M %p")
                );
                announced = true;
            }

            let remaining = (item.scheduled_at - now).to_std().unwrap_or_default();
            self.pause(remaining.min(self.config.max_sleep_slice)).await?;
        }
    }

    /// Rewind the anchor to just before `item` and cool down.
    async fn rewind(&mut self, item: &NotificationItem, reason: &str) -> Result<BatchOutcome, Halt> {
        let anchor = item.scheduled_at - self.config.rewind_offset;
        let cooldown = self.config.sink_cooldown;
        self.stats.rewinds += 1;

        tracing::warn!(
            title = %item.title,
            rewind_to = %anchor,
            cooldown_secs = cooldown.as_secs(),
            "{reason}. Retrying in {} seconds.",
            cooldown.as_secs()
        );

        self.pause(cooldown).await?;
        Ok(BatchOutcome::Rewound { anchor })
    }

    /// Sleep for `duration` unless cancelled first.
    async fn pause(&self, duration: Duration) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            tracing::trace!(from = %self.state, to = %next, "Scheduler state change");
            self.state = next;
        }
    }
}
