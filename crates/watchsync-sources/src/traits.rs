use anyhow::Result;
use async_trait::async_trait;
use watchsync_models::{
    BatchOutcome, HistoryRequest, MediaItem, RatingEntry, RatingsRequest, WatchedEntry,
};

/// The remote tracking service, seen as a batch-oriented data source/sink.
///
/// Every read returns the full collection in one logical request; every write
/// accepts grouped lists so N conceptual mutations cost one network call.
#[async_trait]
pub trait RemoteTracker: Send + Sync {
    async fn get_watched_movies(&self) -> Result<Vec<WatchedEntry>>;
    async fn get_movie_ratings(&self) -> Result<Vec<RatingEntry>>;
    async fn get_show_ratings(&self) -> Result<Vec<RatingEntry>>;
    async fn get_episode_ratings(&self) -> Result<Vec<RatingEntry>>;

    async fn add_to_history(&self, request: &HistoryRequest) -> Result<BatchOutcome>;
    async fn add_ratings(&self, request: &RatingsRequest) -> Result<BatchOutcome>;
}

/// The local media server, seen as a per-item data source/sink.
///
/// Reads are scoped to the configured libraries (empty slice = all). Writes
/// are one call per item; the server exposes no batch mutation surface.
#[async_trait]
pub trait LocalCatalog: Send + Sync {
    async fn get_movies(&self, libraries: &[String]) -> Result<Vec<MediaItem>>;
    async fn get_shows(&self, libraries: &[String]) -> Result<Vec<MediaItem>>;
    async fn get_episodes(&self, libraries: &[String]) -> Result<Vec<MediaItem>>;

    async fn mark_watched(&self, item: &MediaItem) -> Result<()>;
    async fn set_rating(&self, item: &MediaItem, rating: u8) -> Result<()>;
}
