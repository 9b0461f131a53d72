use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Normalized external identifiers for one item.
///
/// Aggregates IDs from both catalogs (IMDB, TMDB, TVDB, the Plex rating key
/// and the Trakt numeric id) so items can be matched across systems. Any
/// subset of fields may be populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imdb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvdb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trakt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plex_rating_key: Option<String>,
}

impl MediaIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge IDs from another source, only filling in missing values.
    pub fn merge(&mut self, other: &MediaIds) {
        if self.imdb.is_none() {
            self.imdb = other.imdb.clone();
        }
        if self.tmdb.is_none() {
            self.tmdb = other.tmdb;
        }
        if self.tvdb.is_none() {
            self.tvdb = other.tvdb;
        }
        if self.trakt.is_none() {
            self.trakt = other.trakt;
        }
        if self.plex_rating_key.is_none() {
            self.plex_rating_key = other.plex_rating_key.clone();
        }
    }

    /// True when no cross-system identifier is populated.
    ///
    /// The Plex rating key is local to one server and does not count: an
    /// item with only a rating key cannot be matched against the remote.
    pub fn is_unmatchable(&self) -> bool {
        self.imdb.is_none() && self.tmdb.is_none() && self.tvdb.is_none() && self.trakt.is_none()
    }
}

impl Hash for MediaIds {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.imdb.hash(state);
        self.tmdb.hash(state);
        self.tvdb.hash(state);
        self.trakt.hash(state);
        self.plex_rating_key.hash(state);
    }
}

/// External identifier scheme recognized by the identifier cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IdNamespace {
    Imdb,
    Tmdb,
    Tvdb,
}

impl IdNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdNamespace::Imdb => "imdb",
            IdNamespace::Tmdb => "tmdb",
            IdNamespace::Tvdb => "tvdb",
        }
    }
}

impl fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
