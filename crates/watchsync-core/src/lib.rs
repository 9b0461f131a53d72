pub mod cache;
pub mod diff;
pub mod sync;

pub use cache::{CacheStats, SyncCache};
pub use diff::{MutationPlan, SnapshotIndex};
pub use sync::SyncEngine;
