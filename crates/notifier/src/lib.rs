//! Notification delivery.
//!
//! A [`Notifier`] posts one [`NotificationItem`] per call and reports a typed
//! [`DeliveryOutcome`]; callers never see HTTP status codes or headers.

pub mod discord;

use std::time::Duration;

use async_trait::async_trait;

use airwatch_common::error::SinkError;
use airwatch_common::types::{DeliveryOutcome, NotificationItem};

pub use discord::DiscordWebhook;

/// Minimum gap between two successful deliveries.
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_secs(1);

/// A channel that release notifications are delivered to.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a single item.
    ///
    /// `Ok(Rejected)` means the channel answered and refused the message;
    /// `Err` means no usable answer was received.
    async fn deliver(&self, item: &NotificationItem) -> Result<DeliveryOutcome, SinkError>;

    /// Spacing the caller must leave after a successful delivery.
    fn min_spacing(&self) -> Duration {
        DEFAULT_MIN_SPACING
    }

    /// Human-readable name for this channel (e.g., "Discord").
    fn name(&self) -> &'static str;
}
