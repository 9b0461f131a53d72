use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaType;
use crate::media_ids::MediaIds;

/// One watched entry from the remote tracker's full-collection snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedEntry {
    pub title: String,
    pub year: Option<u32>,
    pub media_type: MediaType,
    pub ids: MediaIds,
    pub plays: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_watched_at: Option<DateTime<Utc>>,
}

/// One rating entry from the remote tracker's full-collection snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingEntry {
    pub title: String,
    pub year: Option<u32>,
    pub media_type: MediaType,
    pub ids: MediaIds,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<DateTime<Utc>>,
}

/// One item to add to (or remove from) the remote watch history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub title: String,
    pub year: Option<u32>,
    pub ids: MediaIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watched_at: Option<DateTime<Utc>>,
}

/// One rating to upload to the remote tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingUpload {
    pub title: String,
    pub year: Option<u32>,
    pub ids: MediaIds,
    pub rating: u8,
}

/// Batched history write, grouped by kind the way the wire protocol wants it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRequest {
    pub movies: Vec<HistoryEntry>,
    pub episodes: Vec<HistoryEntry>,
}

impl HistoryRequest {
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty() && self.episodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.movies.len() + self.episodes.len()
    }
}

/// Batched ratings write, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingsRequest {
    pub movies: Vec<RatingUpload>,
    pub shows: Vec<RatingUpload>,
    pub episodes: Vec<RatingUpload>,
}

impl RatingsRequest {
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty() && self.shows.is_empty() && self.episodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.movies.len() + self.shows.len() + self.episodes.len()
    }
}

/// Per-kind counts reported by the remote for one batch write.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOutcome {
    #[serde(default)]
    pub movies: u32,
    #[serde(default)]
    pub shows: u32,
    #[serde(default)]
    pub episodes: u32,
}

impl BatchOutcome {
    pub fn total(&self) -> u32 {
        self.movies + self.shows + self.episodes
    }
}
