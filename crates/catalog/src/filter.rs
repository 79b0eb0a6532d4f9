//! Item filter: policy check and normalization of raw schedule records.
//!
//! Pure and deterministic: the same record and policy always yield the same item.

use std::sync::LazyLock;

use regex::Regex;

use airwatch_common::types::{DEFAULT_ORIGIN, NotificationItem, Policy, ScheduleRecord};

/// Longest description (in characters) sent before truncation.
pub const MAX_DESCRIPTION_CHARS: usize = 150;

/// Appended to truncated descriptions.
pub const ELLIPSIS: &str = "...";

/// Substituted when the catalog has no description.
pub const NO_DESCRIPTION: &str = "This anime has no description... ¯\\_(ツ)_/¯";

/// Substituted when the catalog lists no studio.
pub const NO_STUDIO: &str = "N/A";

const COVER_IMAGE_BASE: &str = "https://img.anili.st/media";
const LINK_BASE: &str = "https://anilist.co/anime";

static MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<.*?>|&(\w+|#\d{1,6}|#x[0-9a-f]{1,6});").expect("markup pattern is valid")
});

/// Applies a [`Policy`] to raw records.
#[derive(Debug, Clone, Copy)]
pub struct ItemFilter {
    policy: Policy,
}

impl ItemFilter {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// Whether the policy admits this record.
    pub fn accepts(&self, record: &ScheduleRecord) -> bool {
        let adult_ok = self.policy.allow_adult || !record.is_adult;
        let origin_ok = self.policy.allow_all_origins
            || record.country_of_origin.as_deref() == Some(DEFAULT_ORIGIN);
        adult_ok && origin_ok
    }

    /// Normalize `record` into a deliverable item, or `None` when the policy rejects it.
    pub fn apply(&self, record: &ScheduleRecord) -> Option<NotificationItem> {
        if !self.accepts(record) {
            tracing::trace!(
                id = record.id,
                title = %record.title,
                is_adult = record.is_adult,
                origin = record.country_of_origin.as_deref().unwrap_or("??"),
                "Record excluded by policy"
            );
            return None;
        }

        Some(NotificationItem {
            id: record.id,
            scheduled_at: record.scheduled_at,
            title: record.title.clone(),
            description: format_description(record.description.as_deref()),
            cover_image_url: format!("{COVER_IMAGE_BASE}/{}", record.id),
            link_url: format!("{LINK_BASE}/{}", record.id),
            studio: primary_studio(&record.studios),
            episode: record.episode,
        })
    }
}

/// Strip markup and entities, then cap the text at [`MAX_DESCRIPTION_CHARS`].
pub fn format_description(description: Option<&str>) -> String {
    let raw = match description {
        Some(text) if !text.trim().is_empty() => text,
        _ => return NO_DESCRIPTION.to_string(),
    };

    let stripped = MARKUP.replace_all(raw, "");
    if stripped.trim().is_empty() {
        return NO_DESCRIPTION.to_string();
    }

    if stripped.chars().count() > MAX_DESCRIPTION_CHARS {
        let mut truncated: String = stripped.chars().take(MAX_DESCRIPTION_CHARS).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    } else {
        stripped.into_owned()
    }
}

fn primary_studio(studios: &[String]) -> String {
    studios
        .first()
        .cloned()
        .unwrap_or_else(|| NO_STUDIO.to_string())
}
