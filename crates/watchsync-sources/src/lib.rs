pub mod error;
pub mod plex;
pub mod traits;
pub mod trakt;

pub use error::TraktError;
pub use traits::{LocalCatalog, RemoteTracker};
