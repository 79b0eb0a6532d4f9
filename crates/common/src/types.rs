use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Default length of a catalog window.
pub const DEFAULT_WINDOW_HOURS: u64 = 24;

/// Country code accepted when the policy does not allow every origin.
pub const DEFAULT_ORIGIN: &str = "JP";

/// Process-wide filtering and reporting policy.
///
/// Deserializable as part of [`crate::config::AppConfig`].
///
/// Built once at startup and passed by value (it is `Copy`) to every component that
/// consults it. Never mutated during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Accept releases from every country, not only [`DEFAULT_ORIGIN`].
    pub allow_all_origins: bool,
    /// Accept releases flagged as adult content.
    pub allow_adult: bool,
    /// Emit progress details at `debug` level.
    pub verbose: bool,
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "origins={}, adult={}, verbose={}",
            if self.allow_all_origins { "all" } else { DEFAULT_ORIGIN },
            if self.allow_adult { "allowed" } else { "excluded" },
            self.verbose,
        )
    }
}

/// A contiguous range of instants the catalog is queried for.
///
/// Both bounds are exclusive when matching releases, mirroring the catalog query
/// (`airingAt > start AND airingAt < end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Open a window of `length` anchored at `start`.
    pub fn opening_at(start: DateTime<Utc>, length: TimeDelta) -> Self {
        Self {
            start,
            end: start + length,
        }
    }

    /// Whether a release at `at` falls strictly inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start < at && at < self.end
    }

    pub fn start_epoch(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_epoch(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn length(&self) -> TimeDelta {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// A raw airing-schedule entry as returned by the catalog, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    /// Catalog media identifier. Cover art and link URLs are derived from it.
    pub id: u64,
    pub scheduled_at: DateTime<Utc>,
    pub is_adult: bool,
    /// ISO 3166-1 alpha-2 code, when the catalog knows it.
    pub country_of_origin: Option<String>,
    pub title: String,
    /// Long-form description, possibly containing HTML.
    pub description: Option<String>,
    pub episode: u32,
    /// Production studios, primary first.
    pub studios: Vec<String>,
}

/// A filtered, normalized release ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationItem {
    pub id: u64,
    pub scheduled_at: DateTime<Utc>,
    pub title: String,
    /// Stripped of markup and capped in length.
    pub description: String,
    pub cover_image_url: String,
    pub link_url: String,
    /// Primary studio, or `"N/A"`.
    pub studio: String,
    pub episode: u32,
}

/// Result of a single delivery attempt against the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message was accepted.
    Delivered,
    /// The message was accepted but the channel's quota is exhausted until `retry_after`.
    RateLimited { retry_after: Duration },
    /// The channel answered with a non-success status; the message was not delivered.
    Rejected { status: u16, reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, DeliveryOutcome::Rejected { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryOutcome::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::RateLimited { retry_after } => {
                write!(f, "delivered, rate limited for {}s", retry_after.as_secs())
            }
            DeliveryOutcome::Rejected { status, reason } => {
                write!(f, "rejected with status {status}: {reason}")
            }
        }
    }
}
