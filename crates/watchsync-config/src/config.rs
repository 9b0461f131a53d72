use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::paths::PathManager;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub trakt: TraktConfig,
    #[serde(default)]
    pub plex: PlexConfig,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from the managed config file, or defaults when the
    /// file does not exist yet.
    pub fn load(paths: &PathManager) -> Result<Self> {
        Self::load_from(&paths.config_file())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn save(&self, paths: &PathManager) -> Result<()> {
        self.save_to(&paths.config_file())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {:?}", path))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraktConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl TraktConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlexConfig {
    /// Direct server URL, e.g. http://localhost:32400.
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub movie_libraries: Vec<String>,
    #[serde(default)]
    pub show_libraries: Vec<String>,
}

impl PlexConfig {
    pub fn is_configured(&self) -> bool {
        !self.server_url.is_empty()
    }
}

/// Direction flags and conflict policy for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default = "default_true")]
    pub watched_plex_to_trakt: bool,
    #[serde(default = "default_true")]
    pub watched_trakt_to_plex: bool,
    #[serde(default = "default_true")]
    pub ratings_plex_to_trakt: bool,
    #[serde(default = "default_true")]
    pub ratings_trakt_to_plex: bool,

    /// Which side wins when both carry a rating. Loaded for forward
    /// compatibility; the current diff pass only acts on presence/absence
    /// and leaves both-sides-rated items untouched.
    #[serde(default)]
    pub rating_priority: RatingPriority,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            watched_plex_to_trakt: true,
            watched_trakt_to_plex: true,
            ratings_plex_to_trakt: true,
            ratings_trakt_to_plex: true,
            rating_priority: RatingPriority::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RatingPriority {
    Plex,
    Trakt,
    #[default]
    Newest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Watched-status snapshot TTL in seconds.
    #[serde(default = "default_day")]
    pub watched_ttl_secs: i64,
    /// Rating snapshot TTL in seconds.
    #[serde(default = "default_day")]
    pub ratings_ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            watched_ttl_secs: default_day(),
            ratings_ttl_secs: default_day(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_day() -> i64 {
    24 * 3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.trakt.client_id = "abc".to_string();
        config.plex.server_url = "http://localhost:32400".to_string();
        config.sync.watched_trakt_to_plex = false;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.trakt.client_id, "abc");
        assert_eq!(loaded.plex.server_url, "http://localhost:32400");
        assert!(!loaded.sync.watched_trakt_to_plex);
        assert!(loaded.sync.watched_plex_to_trakt);
        assert_eq!(loaded.cache.watched_ttl_secs, 24 * 3600);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(config.sync.ratings_plex_to_trakt);
        assert_eq!(config.sync.rating_priority, RatingPriority::Newest);
        assert!(!config.trakt.is_configured());
    }
}
