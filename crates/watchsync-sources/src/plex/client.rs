use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::plex::api::{PlexHttpClient, VideoMetadata};
use crate::traits::LocalCatalog;
use watchsync_config::PlexConfig;
use watchsync_models::{MediaIds, MediaItem, MediaType};

/// Local catalog adapter: normalizes one Plex server's libraries into
/// `MediaItem`s and applies per-item watched/rating mutations.
pub struct PlexClient {
    api: PlexHttpClient,
}

impl PlexClient {
    pub fn new(config: &PlexConfig, token: &str) -> Result<Self> {
        if !config.is_configured() {
            anyhow::bail!("Plex server URL not configured; run setup first");
        }
        let api = PlexHttpClient::new(&config.server_url, token)?;
        Ok(Self { api })
    }

    /// Verify connectivity and return the server's friendly name.
    pub async fn check_connection(&self) -> Result<String> {
        let name = self.api.server_name().await?;
        info!("Connected to Plex server {}", name);
        Ok(name)
    }

    /// Section keys of one kind, optionally restricted to named libraries.
    async fn section_keys(&self, kind: &str, libraries: &[String]) -> Result<Vec<String>> {
        let sections = self.api.get_sections().await.context("Failed to list libraries")?;
        Ok(sections
            .into_iter()
            .filter(|s| s.kind == kind)
            .filter(|s| libraries.is_empty() || libraries.contains(&s.title))
            .map(|s| s.key)
            .collect())
    }

    fn rating_key<'a>(&self, item: &'a MediaItem) -> Result<&'a str> {
        item.ids
            .plex_rating_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Item {} has no Plex rating key", item.title))
    }
}

#[async_trait]
impl LocalCatalog for PlexClient {
    async fn get_movies(&self, libraries: &[String]) -> Result<Vec<MediaItem>> {
        let mut items = Vec::new();
        for key in self.section_keys("movie", libraries).await? {
            let videos = self.api.get_section_items(&key).await?;
            debug!("Fetched {} movies from section {}", videos.len(), key);
            items.extend(videos.iter().map(|v| video_to_item(v, ItemKind::Movie)));
        }
        Ok(items)
    }

    async fn get_shows(&self, libraries: &[String]) -> Result<Vec<MediaItem>> {
        let mut items = Vec::new();
        for key in self.section_keys("show", libraries).await? {
            let videos = self.api.get_section_items(&key).await?;
            debug!("Fetched {} shows from section {}", videos.len(), key);
            items.extend(videos.iter().map(|v| video_to_item(v, ItemKind::Show)));
        }
        Ok(items)
    }

    async fn get_episodes(&self, libraries: &[String]) -> Result<Vec<MediaItem>> {
        let mut items = Vec::new();
        for key in self.section_keys("show", libraries).await? {
            let videos = self.api.get_section_episodes(&key).await?;
            debug!("Fetched {} episodes from section {}", videos.len(), key);
            items.extend(videos.iter().map(|v| video_to_item(v, ItemKind::Episode)));
        }
        Ok(items)
    }

    async fn mark_watched(&self, item: &MediaItem) -> Result<()> {
        self.api.mark_watched(self.rating_key(item)?).await
    }

    async fn set_rating(&self, item: &MediaItem, rating: u8) -> Result<()> {
        self.api.set_rating(self.rating_key(item)?, rating).await
    }
}

#[derive(Clone, Copy)]
enum ItemKind {
    Movie,
    Show,
    Episode,
}

/// Parse `scheme://value` GUIDs into external identifiers. Unknown schemes
/// are ignored.
pub fn extract_guid_ids(guids: &[String]) -> MediaIds {
    let mut ids = MediaIds::new();
    for guid in guids {
        if let Some(imdb) = guid.strip_prefix("imdb://") {
            ids.imdb = Some(imdb.to_string());
        } else if let Some(tmdb) = guid.strip_prefix("tmdb://") {
            match tmdb.parse() {
                Ok(value) => ids.tmdb = Some(value),
                Err(_) => warn!("Unparseable tmdb guid: {}", guid),
            }
        } else if let Some(tvdb) = guid.strip_prefix("tvdb://") {
            match tvdb.parse() {
                Ok(value) => ids.tvdb = Some(value),
                Err(_) => warn!("Unparseable tvdb guid: {}", guid),
            }
        }
    }
    ids
}

fn video_to_item(video: &VideoMetadata, kind: ItemKind) -> MediaItem {
    let mut ids = extract_guid_ids(&video.guids);
    ids.plex_rating_key = Some(video.rating_key.clone());

    let media_type = match kind {
        ItemKind::Movie => MediaType::Movie,
        ItemKind::Show => MediaType::Show,
        ItemKind::Episode => MediaType::Episode {
            season: video.season.unwrap_or(0),
            episode: video.episode.unwrap_or(0),
        },
    };

    let title = match (&kind, &video.show_title) {
        (ItemKind::Episode, Some(show)) => format!("{}: {}", show, video.title),
        _ => video.title.clone(),
    };

    MediaItem {
        title,
        year: video.year,
        media_type,
        ids,
        watched: video.view_count > 0,
        watched_at: video.last_viewed_at,
        plays: video.view_count,
        // Server ratings are floats on a 0-10 scale; zero means unrated.
        rating: video
            .user_rating
            .map(|r| r.round() as u8)
            .filter(|r| *r >= 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_parsing_covers_known_schemes() {
        let guids = vec![
            "imdb://tt0113277".to_string(),
            "tmdb://949".to_string(),
            "tvdb://1234".to_string(),
            "plex://movie/5d776825880197001ec90e8f".to_string(),
        ];
        let ids = extract_guid_ids(&guids);
        assert_eq!(ids.imdb.as_deref(), Some("tt0113277"));
        assert_eq!(ids.tmdb, Some(949));
        assert_eq!(ids.tvdb, Some(1234));
        assert!(ids.trakt.is_none());
    }

    #[test]
    fn movie_normalization() {
        let video = VideoMetadata {
            rating_key: "42".to_string(),
            title: "Heat".to_string(),
            year: Some(1995),
            view_count: 2,
            user_rating: Some(9.0),
            guids: vec!["imdb://tt0113277".to_string()],
            ..Default::default()
        };

        let item = video_to_item(&video, ItemKind::Movie);
        assert!(item.watched);
        assert_eq!(item.plays, 2);
        assert_eq!(item.rating, Some(9));
        assert_eq!(item.ids.plex_rating_key.as_deref(), Some("42"));
        assert_eq!(item.media_type, MediaType::Movie);
    }

    #[test]
    fn zero_rating_normalizes_to_none() {
        let video = VideoMetadata {
            rating_key: "42".to_string(),
            title: "Unrated".to_string(),
            user_rating: Some(0.0),
            ..Default::default()
        };
        let item = video_to_item(&video, ItemKind::Movie);
        assert_eq!(item.rating, None);
        assert!(!item.watched);
    }

    #[test]
    fn episode_titles_include_show() {
        let video = VideoMetadata {
            rating_key: "777".to_string(),
            title: "Middle Ground".to_string(),
            show_title: Some("The Wire".to_string()),
            season: Some(3),
            episode: Some(11),
            ..Default::default()
        };
        let item = video_to_item(&video, ItemKind::Episode);
        assert_eq!(item.title, "The Wire: Middle Ground");
        assert_eq!(
            item.media_type,
            MediaType::Episode {
                season: 3,
                episode: 11
            }
        );
    }
}
