pub mod config;
pub mod credentials;
pub mod paths;

pub use config::{CacheConfig, Config, PlexConfig, RatingPriority, SyncOptions, TraktConfig};
pub use credentials::CredentialStore;
pub use paths::PathManager;
