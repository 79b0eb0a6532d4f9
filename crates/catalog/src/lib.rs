pub mod anilist;
pub mod filter;

use async_trait::async_trait;

use airwatch_common::error::SourceError;
use airwatch_common::types::{NotificationItem, TimeWindow};

pub use anilist::AniListClient;
pub use filter::ItemFilter;

/// A catalog of upcoming releases that the scheduler polls once per window.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch every accepted release strictly inside `window`, ordered by scheduled
    /// instant ascending.
    ///
    /// Implementations must not retry; recovery is the scheduler's job.
    async fn fetch(&self, window: TimeWindow) -> Result<Vec<NotificationItem>, SourceError>;

    /// Human-readable name for this source (e.g., "AniList").
    fn name(&self) -> &'static str;
}
