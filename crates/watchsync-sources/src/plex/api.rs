use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const IDENTIFIER: &str = "com.plexapp.plugins.library";

/// Plex metadata type filter for episode listings.
const TYPE_EPISODE: u32 = 4;

#[derive(Debug, Deserialize, Default)]
struct MediaContainer {
    #[serde(rename = "friendlyName")]
    friendly_name: Option<String>,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Value>,
    #[serde(rename = "Directory", default)]
    directory: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PlexResponse {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

/// One library section on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub key: String,
    pub title: String,
    pub kind: String,
}

/// One video item as the server reports it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMetadata {
    pub rating_key: String,
    pub title: String,
    pub year: Option<u32>,
    pub view_count: u32,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub user_rating: Option<f64>,
    pub guids: Vec<String>,
    pub show_title: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// Thin HTTP wrapper over one Plex server.
pub struct PlexHttpClient {
    client: Client,
    server_url: String,
}

impl PlexHttpClient {
    pub fn new(server_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::ACCEPT,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers.insert(
                    reqwest::header::HeaderName::from_static("x-plex-token"),
                    reqwest::header::HeaderValue::from_str(token)
                        .context("Invalid token format")?,
                );
                headers.insert(
                    reqwest::header::HeaderName::from_static("x-plex-client-identifier"),
                    reqwest::header::HeaderValue::from_static("watchsync"),
                );
                headers
            })
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_container(&self, path: &str) -> Result<MediaContainer> {
        let url = format!("{}{}", self.server_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Plex request failed: {}", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Plex returned {} for {}: {}", status, path, body);
        }

        let parsed: PlexResponse = response.json().await.context("Invalid Plex response")?;
        Ok(parsed.media_container)
    }

    /// Verify the token works and return the server name.
    pub async fn server_name(&self) -> Result<String> {
        let container = self.get_container("/").await?;
        Ok(container.friendly_name.unwrap_or_else(|| "unknown".to_string()))
    }

    pub async fn get_sections(&self) -> Result<Vec<SectionInfo>> {
        let container = self.get_container("/library/sections").await?;
        Ok(container
            .directory
            .iter()
            .filter_map(|dir| {
                Some(SectionInfo {
                    key: dir.get("key")?.as_str()?.to_string(),
                    title: dir.get("title")?.as_str()?.to_string(),
                    kind: dir.get("type")?.as_str()?.to_string(),
                })
            })
            .collect())
    }

    /// Every item of one section: movies for movie sections, shows for show
    /// sections.
    pub async fn get_section_items(&self, section_key: &str) -> Result<Vec<VideoMetadata>> {
        let container = self
            .get_container(&format!("/library/sections/{}/all", section_key))
            .await?;
        Ok(parse_items(&container.metadata))
    }

    /// Every episode of one show section, flattened.
    pub async fn get_section_episodes(&self, section_key: &str) -> Result<Vec<VideoMetadata>> {
        let container = self
            .get_container(&format!(
                "/library/sections/{}/all?type={}",
                section_key, TYPE_EPISODE
            ))
            .await?;
        Ok(parse_items(&container.metadata))
    }

    async fn simple_action(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.server_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Plex request failed: {}", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Plex returned {} for {}: {}", status, path, body);
        }
        Ok(())
    }

    pub async fn mark_watched(&self, rating_key: &str) -> Result<()> {
        debug!("Plex scrobble for rating_key={}", rating_key);
        self.simple_action(&format!(
            "/:/scrobble?key={}&identifier={}",
            rating_key, IDENTIFIER
        ))
        .await
    }

    pub async fn mark_unwatched(&self, rating_key: &str) -> Result<()> {
        debug!("Plex unscrobble for rating_key={}", rating_key);
        self.simple_action(&format!(
            "/:/unscrobble?key={}&identifier={}",
            rating_key, IDENTIFIER
        ))
        .await
    }

    pub async fn set_rating(&self, rating_key: &str, rating: u8) -> Result<()> {
        debug!("Plex rate {} for rating_key={}", rating, rating_key);
        self.simple_action(&format!(
            "/:/rate?key={}&identifier={}&rating={}",
            rating_key, IDENTIFIER, rating
        ))
        .await
    }
}

fn parse_items(items: &[Value]) -> Vec<VideoMetadata> {
    items.iter().filter_map(parse_item).collect()
}

/// Parse one metadata entry, returning None for rows missing the essentials.
fn parse_item(item: &Value) -> Option<VideoMetadata> {
    let rating_key = item.get("ratingKey")?.as_str()?.to_string();
    let title = item.get("title")?.as_str()?.to_string();

    let guids = item
        .get("Guid")
        .and_then(|g| g.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("id").and_then(|id| id.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    Some(VideoMetadata {
        rating_key,
        title,
        year: item.get("year").and_then(|v| v.as_u64()).map(|y| y as u32),
        view_count: item
            .get("viewCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        last_viewed_at: item
            .get("lastViewedAt")
            .and_then(|v| v.as_i64())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        user_rating: item.get("userRating").and_then(|v| v.as_f64()),
        guids,
        show_title: item
            .get("grandparentTitle")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        season: item
            .get("parentIndex")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32),
        episode: item.get("index").and_then(|v| v.as_u64()).map(|n| n as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_item_reads_core_fields() {
        let value = json!({
            "ratingKey": "12345",
            "title": "Heat",
            "year": 1995,
            "viewCount": 2,
            "lastViewedAt": 1706788800,
            "userRating": 9.0,
            "Guid": [
                {"id": "imdb://tt0113277"},
                {"id": "tmdb://949"}
            ]
        });

        let item = parse_item(&value).unwrap();
        assert_eq!(item.rating_key, "12345");
        assert_eq!(item.year, Some(1995));
        assert_eq!(item.view_count, 2);
        assert_eq!(item.user_rating, Some(9.0));
        assert_eq!(item.guids.len(), 2);
        assert!(item.last_viewed_at.is_some());
    }

    #[test]
    fn parse_item_rejects_rows_without_rating_key() {
        let value = json!({"title": "No key"});
        assert!(parse_item(&value).is_none());
    }

    #[test]
    fn parse_episode_fields() {
        let value = json!({
            "ratingKey": "777",
            "title": "Middle Ground",
            "grandparentTitle": "The Wire",
            "parentIndex": 3,
            "index": 11
        });

        let item = parse_item(&value).unwrap();
        assert_eq!(item.show_title.as_deref(), Some("The Wire"));
        assert_eq!(item.season, Some(3));
        assert_eq!(item.episode, Some(11));
        assert_eq!(item.view_count, 0);
    }
}
