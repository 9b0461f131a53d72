pub mod media;
pub mod media_ids;
pub mod remote;
pub mod sync_result;

pub use media::{MediaItem, MediaType};
pub use media_ids::{IdNamespace, MediaIds};
pub use remote::{
    BatchOutcome, HistoryEntry, HistoryRequest, RatingEntry, RatingUpload, RatingsRequest,
    WatchedEntry,
};
pub use sync_result::SyncResult;
