use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media_ids::MediaIds;

/// A normalized unit of content from either catalog.
///
/// Built fresh on every adapter fetch and never persisted directly; only the
/// derived cache rows and mutation payloads outlive a sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    pub title: String,
    pub year: Option<u32>,
    pub media_type: MediaType,
    pub ids: MediaIds,
    pub watched: bool,
    pub watched_at: Option<DateTime<Utc>>,
    pub plays: u32,
    /// User rating on the 1-10 scale. Zero is never stored; an unrated item
    /// carries `None`.
    pub rating: Option<u8>,
}

impl MediaItem {
    /// Whether the item carries a usable rating (1-10; zero counts as unset).
    pub fn effective_rating(&self) -> Option<u8> {
        self.rating.filter(|r| *r >= 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaType {
    Movie,
    Show,
    Episode { season: u32, episode: u32 },
}

impl MediaType {
    /// Stable string form used as the cache key component.
    pub fn as_cache_key(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Show => "show",
            MediaType::Episode { .. } => "episode",
        }
    }
}
