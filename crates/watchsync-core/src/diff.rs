//! Mutation planning: pure comparison of one local item set against the
//! remote watched/rating snapshots.

use std::collections::HashMap;
use tracing::debug;

use watchsync_config::SyncOptions;
use watchsync_models::{
    HistoryEntry, MediaIds, MediaItem, RatingEntry, RatingUpload, WatchedEntry,
};

pub trait HasMediaIds {
    fn media_ids(&self) -> &MediaIds;
}

impl HasMediaIds for WatchedEntry {
    fn media_ids(&self) -> &MediaIds {
        &self.ids
    }
}

impl HasMediaIds for RatingEntry {
    fn media_ids(&self) -> &MediaIds {
        &self.ids
    }
}

/// Lookup table over one remote snapshot, keyed by every populated external
/// identifier.
///
/// Probes resolve in identifier-precedence order: IMDB first, then TMDB.
/// IMDB ids are the most stable namespace for this domain, so when both are
/// present and would match different entries the IMDB match wins.
pub struct SnapshotIndex<'a, T> {
    by_imdb: HashMap<&'a str, &'a T>,
    by_tmdb: HashMap<u32, &'a T>,
}

impl<'a, T: HasMediaIds> SnapshotIndex<'a, T> {
    pub fn build(entries: &'a [T]) -> Self {
        let mut by_imdb = HashMap::new();
        let mut by_tmdb = HashMap::new();
        for entry in entries {
            let ids = entry.media_ids();
            if let Some(imdb) = ids.imdb.as_deref() {
                by_imdb.insert(imdb, entry);
            }
            if let Some(tmdb) = ids.tmdb {
                by_tmdb.insert(tmdb, entry);
            }
        }
        Self { by_imdb, by_tmdb }
    }

    pub fn lookup(&self, ids: &MediaIds) -> Option<&'a T> {
        if let Some(imdb) = ids.imdb.as_deref() {
            if let Some(entry) = self.by_imdb.get(imdb) {
                return Some(entry);
            }
        }
        if let Some(tmdb) = ids.tmdb {
            if let Some(entry) = self.by_tmdb.get(&tmdb) {
                return Some(entry);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.by_imdb.len().max(self.by_tmdb.len())
    }

    pub fn is_empty(&self) -> bool {
        self.by_imdb.is_empty() && self.by_tmdb.is_empty()
    }
}

/// The four mutation sets computed for one content kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationPlan {
    pub mark_watched_remote: Vec<HistoryEntry>,
    pub mark_watched_local: Vec<MediaItem>,
    pub rate_remote: Vec<RatingUpload>,
    pub rate_local: Vec<(MediaItem, u8)>,
    /// Items with no identifier in a matchable namespace; skipped, not
    /// errors.
    pub unmatched: u32,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.mark_watched_remote.is_empty()
            && self.mark_watched_local.is_empty()
            && self.rate_remote.is_empty()
            && self.rate_local.is_empty()
    }
}

/// An item can only be matched through the namespaces the indices cover.
fn matchable(ids: &MediaIds) -> bool {
    ids.imdb.is_some() || ids.tmdb.is_some()
}

fn history_entry(item: &MediaItem) -> HistoryEntry {
    HistoryEntry {
        title: item.title.clone(),
        year: item.year,
        ids: item.ids.clone(),
        watched_at: item.watched_at,
    }
}

fn rating_upload(item: &MediaItem, rating: u8) -> RatingUpload {
    RatingUpload {
        title: item.title.clone(),
        year: item.year,
        ids: item.ids.clone(),
        rating,
    }
}

/// Compute the mutation sets for one kind of content.
///
/// Watched reconciliation runs only when a watched index is supplied (movies;
/// the remote exposes no per-episode watched snapshot with external ids).
/// Decisions are strict presence/absence — never timestamp comparison — and
/// each of the four flows is gated by its own direction flag. When both sides
/// already carry a rating the item is left untouched.
pub fn plan_mutations(
    items: &[MediaItem],
    watched: Option<&SnapshotIndex<WatchedEntry>>,
    ratings: &SnapshotIndex<RatingEntry>,
    options: &SyncOptions,
) -> MutationPlan {
    let mut plan = MutationPlan::default();

    for item in items {
        if !matchable(&item.ids) {
            plan.unmatched += 1;
            if plan.unmatched <= 5 {
                debug!("Skipping unmatchable item: {}", item.title);
            }
            continue;
        }

        if let Some(watched_index) = watched {
            let remote_watched = watched_index.lookup(&item.ids).is_some();
            if item.watched && !remote_watched && options.watched_plex_to_trakt {
                plan.mark_watched_remote.push(history_entry(item));
            } else if remote_watched && !item.watched && options.watched_trakt_to_plex {
                plan.mark_watched_local.push(item.clone());
            }
        }

        let local_rating = item.effective_rating();
        let remote_rating = ratings
            .lookup(&item.ids)
            .map(|entry| entry.rating)
            .filter(|rating| *rating >= 1);

        match (local_rating, remote_rating) {
            (Some(rating), None) if options.ratings_plex_to_trakt => {
                plan.rate_remote.push(rating_upload(item, rating));
            }
            (None, Some(rating)) if options.ratings_trakt_to_plex => {
                plan.rate_local.push((item.clone(), rating));
            }
            // Both sides rated: no conflict resolution in this pass.
            _ => {}
        }
    }

    debug!(
        "Planned mutations: {} -> remote watched, {} -> local watched, {} -> remote ratings, {} -> local ratings, {} unmatched",
        plan.mark_watched_remote.len(),
        plan.mark_watched_local.len(),
        plan.rate_remote.len(),
        plan.rate_local.len(),
        plan.unmatched
    );

    plan
}
