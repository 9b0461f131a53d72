use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TraktError;
use watchsync_models::{
    BatchOutcome, HistoryEntry, HistoryRequest, MediaIds, MediaType, RatingEntry, RatingUpload,
    RatingsRequest, WatchedEntry,
};

pub const TRAKT_API_URL: &str = "https://api.trakt.tv";

const API_VERSION: &str = "2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraktIds {
    pub imdb: Option<String>,
    pub trakt: Option<u64>,
    pub tmdb: Option<u32>,
    pub tvdb: Option<u32>,
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraktMovie {
    title: String,
    year: Option<u32>,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktShow {
    title: String,
    year: Option<u32>,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktEpisode {
    title: Option<String>,
    season: Option<u32>,
    number: Option<u32>,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktWatchedItem {
    plays: Option<u32>,
    #[serde(rename = "last_watched_at")]
    last_watched_at: Option<String>,
    movie: Option<TraktMovie>,
    show: Option<TraktShow>,
}

#[derive(Debug, Deserialize)]
struct TraktRatedItem {
    #[serde(rename = "rated_at")]
    rated_at: Option<String>,
    rating: u8,
    #[serde(rename = "type")]
    item_type: String,
    movie: Option<TraktMovie>,
    show: Option<TraktShow>,
    episode: Option<TraktEpisode>,
}

#[derive(Debug, Deserialize)]
struct TraktCollectedItem {
    #[serde(rename = "collected_at")]
    collected_at: Option<String>,
    movie: Option<TraktMovie>,
    show: Option<TraktShow>,
}

/// One entry from the remote collection snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedEntry {
    pub title: String,
    pub year: Option<u32>,
    pub media_type: MediaType,
    pub ids: MediaIds,
    pub collected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
struct SyncWriteResponse {
    #[serde(default)]
    added: BatchOutcome,
    #[serde(default)]
    deleted: BatchOutcome,
}

/// Remote ids sometimes arrive with stray slashes; strip them.
fn clean_imdb(id: Option<String>) -> Option<String> {
    id.map(|s| s.replace('/', "")).filter(|s| !s.is_empty())
}

fn to_media_ids(ids: &TraktIds) -> MediaIds {
    MediaIds {
        imdb: clean_imdb(ids.imdb.clone()),
        tmdb: ids.tmdb,
        tvdb: ids.tvdb,
        trakt: ids.trakt,
        plex_rating_key: None,
    }
}

fn parse_timestamp(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn ids_json(ids: &MediaIds) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(ref imdb) = ids.imdb {
        obj.insert("imdb".to_string(), Value::String(imdb.clone()));
    }
    if let Some(tmdb) = ids.tmdb {
        obj.insert("tmdb".to_string(), Value::Number(tmdb.into()));
    }
    if let Some(tvdb) = ids.tvdb {
        obj.insert("tvdb".to_string(), Value::Number(tvdb.into()));
    }
    if let Some(trakt) = ids.trakt {
        obj.insert("trakt".to_string(), Value::Number(trakt.into()));
    }
    Value::Object(obj)
}

fn history_entry_json(entry: &HistoryEntry) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("title".to_string(), Value::String(entry.title.clone()));
    if let Some(year) = entry.year {
        obj.insert("year".to_string(), Value::Number(year.into()));
    }
    obj.insert("ids".to_string(), ids_json(&entry.ids));
    if let Some(watched_at) = entry.watched_at {
        obj.insert(
            "watched_at".to_string(),
            Value::String(watched_at.to_rfc3339()),
        );
    }
    Value::Object(obj)
}

fn rating_upload_json(upload: &RatingUpload) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("title".to_string(), Value::String(upload.title.clone()));
    if let Some(year) = upload.year {
        obj.insert("year".to_string(), Value::Number(year.into()));
    }
    obj.insert("ids".to_string(), ids_json(&upload.ids));
    obj.insert("rating".to_string(), Value::Number(upload.rating.into()));
    Value::Object(obj)
}

/// HTTP-level client for the remote tracker.
///
/// All calls go through a shared rate-limit-aware request wrapper; bulk
/// operations map one logical operation to one network request.
pub struct TraktHttpClient {
    client: Client,
    base_url: String,
    client_id: String,
    access_token: Option<String>,
    retries: u32,
}

impl TraktHttpClient {
    pub fn new(client_id: String) -> Result<Self, TraktError> {
        Self::with_base_url(client_id, TRAKT_API_URL)
    }

    /// Build a client against an alternate base URL. Tests point this at a
    /// local listener.
    pub fn with_base_url(client_id: String, base_url: &str) -> Result<Self, TraktError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            access_token: None,
            retries: RETRY_BUDGET,
        })
    }

    pub fn set_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn bearer(&self) -> Result<&str, TraktError> {
        self.access_token
            .as_deref()
            .ok_or(TraktError::NotAuthenticated)
    }

    /// Issue one request, retrying only on 429 responses.
    ///
    /// On a rate-limit response the wrapper sleeps `Retry-After + 1` seconds
    /// (60 when the header is absent) and tries again, up to the retry
    /// budget. Any other error status fails immediately: write calls are not
    /// proven idempotent against this service, so blind retries are unsafe.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, TraktError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_retry_after = DEFAULT_RETRY_AFTER_SECS;

        for attempt in 0..self.retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .header("trakt-api-version", API_VERSION)
                .header("trakt-api-key", &self.client_id);
            if let Some(token) = self.access_token.as_deref() {
                request = request.header("Authorization", format!("Bearer {}", token));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                last_retry_after = retry_after;

                if attempt + 1 < self.retries {
                    warn!(
                        "Rate limited on {}, waiting {}s (attempt {}/{})",
                        path,
                        retry_after + 1,
                        attempt + 1,
                        self.retries
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after + 1)).await;
                }
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TraktError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(response);
        }

        Err(TraktError::RateLimited {
            retry_after: last_retry_after,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, TraktError> {
        self.bearer()?;
        let response = self.request(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    // Batch reads: one request returns the full collection.

    pub async fn get_watched_movies(&self) -> Result<Vec<WatchedEntry>, TraktError> {
        let items: Vec<TraktWatchedItem> = self.get_json("/sync/watched/movies").await?;
        Ok(watched_entries(items, false))
    }

    pub async fn get_watched_shows(&self) -> Result<Vec<WatchedEntry>, TraktError> {
        let items: Vec<TraktWatchedItem> = self.get_json("/sync/watched/shows").await?;
        Ok(watched_entries(items, true))
    }

    pub async fn get_movie_ratings(&self) -> Result<Vec<RatingEntry>, TraktError> {
        let items: Vec<TraktRatedItem> = self.get_json("/sync/ratings/movies").await?;
        Ok(rating_entries(items))
    }

    pub async fn get_show_ratings(&self) -> Result<Vec<RatingEntry>, TraktError> {
        let items: Vec<TraktRatedItem> = self.get_json("/sync/ratings/shows").await?;
        Ok(rating_entries(items))
    }

    pub async fn get_episode_ratings(&self) -> Result<Vec<RatingEntry>, TraktError> {
        let items: Vec<TraktRatedItem> = self.get_json("/sync/ratings/episodes").await?;
        Ok(rating_entries(items))
    }

    pub async fn get_collection_movies(&self) -> Result<Vec<CollectedEntry>, TraktError> {
        let items: Vec<TraktCollectedItem> = self.get_json("/sync/collection/movies").await?;
        Ok(collected_entries(items, false))
    }

    pub async fn get_collection_shows(&self) -> Result<Vec<CollectedEntry>, TraktError> {
        let items: Vec<TraktCollectedItem> = self.get_json("/sync/collection/shows").await?;
        Ok(collected_entries(items, true))
    }

    // Batch writes: grouped lists, one request, empty payload short-circuits.

    pub async fn add_to_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<BatchOutcome, TraktError> {
        self.history_call("/sync/history", request, true).await
    }

    pub async fn remove_from_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<BatchOutcome, TraktError> {
        self.history_call("/sync/history/remove", request, false)
            .await
    }

    pub async fn add_ratings(&self, request: &RatingsRequest) -> Result<BatchOutcome, TraktError> {
        self.ratings_call("/sync/ratings", request, true).await
    }

    pub async fn remove_ratings(
        &self,
        request: &RatingsRequest,
    ) -> Result<BatchOutcome, TraktError> {
        self.ratings_call("/sync/ratings/remove", request, false)
            .await
    }

    async fn history_call(
        &self,
        path: &str,
        request: &HistoryRequest,
        adding: bool,
    ) -> Result<BatchOutcome, TraktError> {
        if request.is_empty() {
            return Ok(BatchOutcome::default());
        }
        self.bearer()?;

        let payload = json!({
            "movies": request.movies.iter().map(history_entry_json).collect::<Vec<_>>(),
            "episodes": request.episodes.iter().map(history_entry_json).collect::<Vec<_>>(),
        });

        debug!(
            "Submitting history batch to {}: {} movies, {} episodes",
            path,
            request.movies.len(),
            request.episodes.len()
        );
        let response = self.request(Method::POST, path, Some(&payload)).await?;
        let parsed: SyncWriteResponse = response.json().await?;
        Ok(if adding { parsed.added } else { parsed.deleted })
    }

    async fn ratings_call(
        &self,
        path: &str,
        request: &RatingsRequest,
        adding: bool,
    ) -> Result<BatchOutcome, TraktError> {
        if request.is_empty() {
            return Ok(BatchOutcome::default());
        }
        self.bearer()?;

        let payload = json!({
            "movies": request.movies.iter().map(rating_upload_json).collect::<Vec<_>>(),
            "shows": request.shows.iter().map(rating_upload_json).collect::<Vec<_>>(),
            "episodes": request.episodes.iter().map(rating_upload_json).collect::<Vec<_>>(),
        });

        debug!(
            "Submitting ratings batch to {}: {} movies, {} shows, {} episodes",
            path,
            request.movies.len(),
            request.shows.len(),
            request.episodes.len()
        );
        let response = self.request(Method::POST, path, Some(&payload)).await?;
        let parsed: SyncWriteResponse = response.json().await?;
        Ok(if adding { parsed.added } else { parsed.deleted })
    }
}

fn watched_entries(items: Vec<TraktWatchedItem>, shows: bool) -> Vec<WatchedEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0;

    for item in items {
        let (title, year, ids, media_type) = if shows {
            match item.show {
                Some(show) => (show.title, show.year, show.ids, MediaType::Show),
                None => {
                    skipped += 1;
                    continue;
                }
            }
        } else {
            match item.movie {
                Some(movie) => (movie.title, movie.year, movie.ids, MediaType::Movie),
                None => {
                    skipped += 1;
                    continue;
                }
            }
        };

        let media_ids = to_media_ids(&ids);
        if media_ids.is_unmatchable() {
            skipped += 1;
            continue;
        }

        entries.push(WatchedEntry {
            title,
            year,
            media_type,
            ids: media_ids,
            plays: item.plays.unwrap_or(1),
            last_watched_at: parse_timestamp(&item.last_watched_at),
        });
    }

    if skipped > 0 {
        debug!("Skipped {} watched entries with no usable ids", skipped);
    }
    entries
}

fn rating_entries(items: Vec<TraktRatedItem>) -> Vec<RatingEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0;

    for item in items {
        let (title, year, ids, media_type) = match item.item_type.as_str() {
            "movie" => match item.movie {
                Some(movie) => (movie.title, movie.year, movie.ids, MediaType::Movie),
                None => {
                    skipped += 1;
                    continue;
                }
            },
            "show" => match item.show {
                Some(show) => (show.title, show.year, show.ids, MediaType::Show),
                None => {
                    skipped += 1;
                    continue;
                }
            },
            "episode" => match (item.episode, item.show) {
                (Some(episode), show) => {
                    let title = match (&show, &episode.title) {
                        (Some(s), Some(e)) => format!("{}: {}", s.title, e),
                        (Some(s), None) => s.title.clone(),
                        (None, Some(e)) => e.clone(),
                        (None, None) => String::new(),
                    };
                    (
                        title,
                        show.and_then(|s| s.year),
                        episode.ids,
                        MediaType::Episode {
                            season: episode.season.unwrap_or(0),
                            episode: episode.number.unwrap_or(0),
                        },
                    )
                }
                _ => {
                    skipped += 1;
                    continue;
                }
            },
            _ => {
                skipped += 1;
                continue;
            }
        };

        // Ratings are 1-10; anything else is a malformed entry.
        if item.rating < 1 || item.rating > 10 {
            skipped += 1;
            continue;
        }

        let media_ids = to_media_ids(&ids);
        if media_ids.is_unmatchable() {
            skipped += 1;
            continue;
        }

        entries.push(RatingEntry {
            title,
            year,
            media_type,
            ids: media_ids,
            rating: item.rating,
            rated_at: parse_timestamp(&item.rated_at),
        });
    }

    if skipped > 0 {
        debug!("Skipped {} rating entries with no usable ids", skipped);
    }
    entries
}

fn collected_entries(items: Vec<TraktCollectedItem>, shows: bool) -> Vec<CollectedEntry> {
    items
        .into_iter()
        .filter_map(|item| {
            let (title, year, ids, media_type) = if shows {
                let show = item.show?;
                (show.title, show.year, show.ids, MediaType::Show)
            } else {
                let movie = item.movie?;
                (movie.title, movie.year, movie.ids, MediaType::Movie)
            };
            let media_ids = to_media_ids(&ids);
            if media_ids.is_unmatchable() {
                return None;
            }
            Some(CollectedEntry {
                title,
                year,
                media_type,
                ids: media_ids,
                collected_at: parse_timestamp(&item.collected_at),
            })
        })
        .collect()
}
