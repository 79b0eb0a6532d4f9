//! Discord webhook channel.
//!
//! Each release is posted as a single embed. Discord reports the remaining quota of
//! the webhook's bucket in response headers; when it reaches zero the outcome carries
//! the bucket's reset delay so the scheduler can wait it out before the next post.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;

use airwatch_common::error::SinkError;
use airwatch_common::types::{DeliveryOutcome, NotificationItem};

use crate::{DEFAULT_MIN_SPACING, Notifier};

/// Wait applied when the quota is exhausted but no reset hint is given.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

const EMBED_COLOR: u32 = 16734296;
const RELEASE_TIME_FORMAT: &str = "%A @ %I:%M %p";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_AFTER_HEADER: &str = "x-ratelimit-reset-after";

/// Longest response body kept in a rejection reason.
const MAX_REASON_CHARS: usize = 200;

/// Discord webhook sink.
pub struct DiscordWebhook {
    http: reqwest::Client,
    url: String,
    min_spacing: Duration,
}

impl DiscordWebhook {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("airwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            min_spacing: DEFAULT_MIN_SPACING,
        })
    }

    pub fn with_min_spacing(mut self, min_spacing: Duration) -> Self {
        self.min_spacing = min_spacing;
        self
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    async fn deliver(&self, item: &NotificationItem) -> Result<DeliveryOutcome, SinkError> {
        let payload = WebhookPayload::for_item(item, &Local);

        tracing::debug!(title = %item.title, episode = item.episode, "Posting to Discord");

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SinkError::Unavailable(format!(
                "Discord API call failed with code {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(DeliveryOutcome::Rejected {
                status: status.as_u16(),
                reason: body.chars().take(MAX_REASON_CHARS).collect(),
            });
        }

        let outcome = rate_limit_outcome(response.headers());
        if let Some(retry_after) = outcome.retry_after() {
            tracing::warn!(
                retry_after_secs = retry_after.as_secs(),
                "Discord API limit reached"
            );
        }
        tracing::debug!(title = %item.title, "Success");

        Ok(outcome)
    }

    fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    fn name(&self) -> &'static str {
        "Discord"
    }
}

fn classify_transport_error(e: reqwest::Error) -> SinkError {
    if e.is_timeout() {
        SinkError::Timeout
    } else if e.is_builder() {
        SinkError::Request(e.to_string())
    } else {
        SinkError::Unavailable(e.to_string())
    }
}

/// Inspect Discord's bucket headers after a successful post.
fn rate_limit_outcome(headers: &HeaderMap) -> DeliveryOutcome {
    let remaining = headers
        .get(REMAINING_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if remaining != Some(0) {
        return DeliveryOutcome::Delivered;
    }

    let reset_after = headers
        .get(RESET_AFTER_HEADER)
        .and_then(|v| v.to_str().ok());

    DeliveryOutcome::RateLimited {
        retry_after: parse_reset_after(reset_after),
    }
}

/// Discord sends the reset delay as fractional seconds (e.g. `"1.337"`); round up.
fn parse_reset_after(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs(secs.ceil() as u64))
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Render a release instant like `Saturday @ 09:30 PM` in `tz`.
pub fn format_release_time<Tz>(at: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format(RELEASE_TIME_FORMAT).to_string()
}

// --- Discord webhook payload ---

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub image: EmbedImage,
}

#[derive(Debug, Serialize)]
pub struct EmbedField {
    pub name: &'static str,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

impl WebhookPayload {
    /// Build the embed for `item`, rendering the release time in `tz`.
    pub fn for_item<Tz>(item: &NotificationItem, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let fields = vec![
            EmbedField {
                name: "Episode",
                value: item.episode.to_string(),
                inline: true,
            },
            EmbedField {
                name: "Released",
                value: format_release_time(item.scheduled_at, tz),
                inline: true,
            },
            EmbedField {
                name: "Studio",
                value: item.studio.clone(),
                inline: true,
            },
        ];

        Self {
            embeds: vec![Embed {
                title: item.title.clone(),
                description: item.description.clone(),
                url: item.link_url.clone(),
                color: EMBED_COLOR,
                fields,
                image: EmbedImage {
                    url: item.cover_image_url.clone(),
                },
            }],
        }
    }
}
