//! AniList GraphQL client for the airing schedule.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use airwatch_common::error::SourceError;
use airwatch_common::types::{NotificationItem, Policy, ScheduleRecord, TimeWindow};

use crate::ReleaseSource;
use crate::filter::ItemFilter;

/// Records requested per page.
pub const PAGE_SIZE: u32 = 50;

/// Default cap on pages fetched for a single window.
pub const DEFAULT_MAX_PAGES: u32 = 10;

const AIRING_SCHEDULE_QUERY: &str = r#"
query ($start: Int, $end: Int, $page: Int, $perPage: Int) {
    Page(page: $page, perPage: $perPage) {
        pageInfo {
            currentPage
            hasNextPage
        }
        airingSchedules(airingAt_greater: $start, airingAt_lesser: $end, sort: TIME) {
            episode
            airingAt
            media {
                id
                isAdult
                countryOfOrigin
                title {
                    romaji
                    english
                }
                description
                studios(isMain: true) {
                    nodes {
                        name
                    }
                }
            }
        }
    }
}
"#;

/// Catalog client backed by the AniList GraphQL API.
pub struct AniListClient {
    http: reqwest::Client,
    endpoint: String,
    filter: ItemFilter,
    max_pages: u32,
}

impl AniListClient {
    pub fn new(endpoint: String, policy: Policy, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("airwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            filter: ItemFilter::new(policy),
            max_pages: DEFAULT_MAX_PAGES,
        })
    }

    /// Limit how many pages are requested per window.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetch every raw record in `window`, following pagination.
    pub async fn fetch_records(&self, window: TimeWindow) -> Result<Vec<ScheduleRecord>, SourceError> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            tracing::debug!(page, window = %window, "Contacting AniList");
            let body = self.fetch_page(window, page).await?;
            let schedule = body.into_page()?;

            for entry in schedule.airing_schedules {
                records.push(entry.into_record()?);
            }

            if !schedule.page_info.has_next_page {
                break;
            }
            if page >= self.max_pages {
                tracing::warn!(
                    pages = page,
                    records = records.len(),
                    window = %window,
                    "Page cap reached before the window was exhausted; later releases will be picked up by the next window"
                );
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    async fn fetch_page(&self, window: TimeWindow, page: u32) -> Result<GraphQlResponse, SourceError> {
        let payload = json!({
            "query": AIRING_SCHEDULE_QUERY,
            "variables": {
                "start": window.start_epoch(),
                "end": window.end_epoch(),
                "page": page,
                "perPage": PAGE_SIZE,
            }
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NoItemsInWindow(window));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::Unavailable(format!(
                "AniList API call failed with code {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        // A body cut off mid-stream is a transport failure, not a bad payload.
        let body = response.bytes().await.map_err(classify_transport_error)?;
        serde_json::from_slice::<GraphQlResponse>(&body)
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ReleaseSource for AniListClient {
    async fn fetch(&self, window: TimeWindow) -> Result<Vec<NotificationItem>, SourceError> {
        let records = self.fetch_records(window).await?;
        let total = records.len();

        // Pages can shift while being walked; drop anything the window does not cover.
        let mut items: Vec<NotificationItem> = records
            .iter()
            .filter(|r| window.contains(r.scheduled_at))
            .filter_map(|r| self.filter.apply(r))
            .collect();
        // Pages are each sorted by time; a stable sort keeps that order across page seams.
        items.sort_by_key(|item| item.scheduled_at);

        tracing::debug!(
            fetched = total,
            accepted = items.len(),
            hours = window.length().num_hours(),
            "{} episode(s) releasing in the next {} hours",
            items.len(),
            window.length().num_hours()
        );

        Ok(items)
    }

    fn name(&self) -> &'static str {
        "AniList"
    }
}

fn classify_transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else if e.is_builder() {
        SourceError::Request(e.to_string())
    } else {
        SourceError::Unavailable(e.to_string())
    }
}

// --- AniList response types ---

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PageData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PageData {
    page: Option<SchedulePage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulePage {
    page_info: PageInfo,
    #[serde(default)]
    airing_schedules: Vec<AiringSchedule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiringSchedule {
    episode: u32,
    airing_at: i64,
    media: Media,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Media {
    id: u64,
    #[serde(default)]
    is_adult: bool,
    country_of_origin: Option<String>,
    title: MediaTitle,
    description: Option<String>,
    studios: Option<StudioConnection>,
}

#[derive(Debug, Deserialize)]
struct MediaTitle {
    romaji: Option<String>,
    english: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StudioConnection {
    #[serde(default)]
    nodes: Vec<Studio>,
}

#[derive(Debug, Deserialize)]
struct Studio {
    name: String,
}

impl GraphQlResponse {
    fn into_page(self) -> Result<SchedulePage, SourceError> {
        if let Some(page) = self.data.and_then(|d| d.page) {
            return Ok(page);
        }

        let detail = if self.errors.is_empty() {
            "response has no Page data".to_string()
        } else {
            self.errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(SourceError::Malformed(detail))
    }
}

impl AiringSchedule {
    fn into_record(self) -> Result<ScheduleRecord, SourceError> {
        let scheduled_at = DateTime::from_timestamp(self.airing_at, 0).ok_or_else(|| {
            SourceError::Malformed(format!("airingAt {} is out of range", self.airing_at))
        })?;

        let title = self
            .media
            .title
            .romaji
            .or(self.media.title.english)
            .unwrap_or_else(|| format!("AniList #{}", self.media.id));

        Ok(ScheduleRecord {
            id: self.media.id,
            scheduled_at,
            is_adult: self.media.is_adult,
            country_of_origin: self.media.country_of_origin,
            title,
            description: self.media.description,
            episode: self.episode,
            studios: self
                .media
                .studios
                .map(|s| s.nodes.into_iter().map(|n| n.name).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let body = serde_json::json!({
            "data": {
                "Page": {
                    "pageInfo": { "currentPage": 1, "hasNextPage": false },
                    "airingSchedules": [{
                        "episode": 3,
                        "airingAt": 1712412000,
                        "media": {
                            "id": 21,
                            "isAdult": false,
                            "countryOfOrigin": "JP",
                            "title": { "romaji": "One Piece", "english": null },
                            "description": "Pirates.",
                            "studios": { "nodes": [{ "name": "Toei Animation" }] }
                        }
                    }]
                }
            }
        });

        let response: GraphQlResponse = serde_json::from_value(body).unwrap();
        let page = response.into_page().unwrap();
        assert!(!page.page_info.has_next_page);

        let record = page.airing_schedules.into_iter().next().unwrap().into_record().unwrap();
        assert_eq!(record.id, 21);
        assert_eq!(record.title, "One Piece");
        assert_eq!(record.episode, 3);
        assert_eq!(record.scheduled_at.timestamp(), 1712412000);
        assert_eq!(record.studios, vec!["Toei Animation".to_string()]);
    }

    #[test]
    fn test_title_falls_back_to_english_then_id() {
        let entry: AiringSchedule = serde_json::from_value(serde_json::json!({
            "episode": 1,
            "airingAt": 1712412000,
            "media": {
                "id": 7,
                "title": { "romaji": null, "english": "Seven" },
                "description": null,
                "countryOfOrigin": "JP",
                "studios": null
            }
        }))
        .unwrap();
        let record = entry.into_record().unwrap();
        assert_eq!(record.title, "Seven");
        assert!(record.studios.is_empty());
        assert!(!record.is_adult);

        let entry: AiringSchedule = serde_json::from_value(serde_json::json!({
            "episode": 1,
            "airingAt": 1712412000,
            "media": { "id": 8, "title": { "romaji": null, "english": null } }
        }))
        .unwrap();
        assert_eq!(entry.into_record().unwrap().title, "AniList #8");
    }

    #[test]
    fn test_graphql_errors_are_malformed() {
        let response: GraphQlResponse = serde_json::from_value(serde_json::json!({
            "data": null,
            "errors": [{ "message": "Invalid token" }]
        }))
        .unwrap();
        match response.into_page() {
            Err(SourceError::Malformed(detail)) => assert_eq!(detail, "Invalid token"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }
}
