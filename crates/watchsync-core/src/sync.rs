//! The reconciliation engine: fetch both snapshots, plan the minimal
//! mutation sets, apply them in bulk.

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info};

use crate::cache::SyncCache;
use crate::diff::{plan_mutations, SnapshotIndex};
use watchsync_config::Config;
use watchsync_models::{
    HistoryRequest, IdNamespace, MediaIds, MediaItem, MediaType, RatingEntry, RatingsRequest,
    SyncResult, WatchedEntry,
};
use watchsync_sources::{LocalCatalog, RemoteTracker};

/// Coordinates one sync run between the local catalog and the remote
/// tracker.
///
/// A run is a single logical flow: sequential fetches, pure planning, then
/// application. Remote-bound mutations are flattened into at most one
/// history call and one ratings call; local-bound mutations apply per item
/// with failures isolated into the run result.
pub struct SyncEngine<'a, R, L> {
    config: &'a Config,
    remote: &'a R,
    local: &'a L,
    cache: &'a mut SyncCache,
}

impl<'a, R: RemoteTracker, L: LocalCatalog> SyncEngine<'a, R, L> {
    pub fn new(config: &'a Config, remote: &'a R, local: &'a L, cache: &'a mut SyncCache) -> Self {
        Self {
            config,
            remote,
            local,
            cache,
        }
    }

    pub async fn run(&mut self, dry_run: bool) -> Result<SyncResult> {
        let start = Instant::now();
        let mut result = SyncResult {
            dry_run,
            ..Default::default()
        };

        // Phase 1: full snapshots from both sides, one batch call each.
        info!("Fetching remote snapshots");
        let watched_movies = self
            .remote
            .get_watched_movies()
            .await
            .context("Failed to fetch remote watched movies")?;
        let movie_ratings = self
            .remote
            .get_movie_ratings()
            .await
            .context("Failed to fetch remote movie ratings")?;
        let show_ratings = self
            .remote
            .get_show_ratings()
            .await
            .context("Failed to fetch remote show ratings")?;
        let episode_ratings = self
            .remote
            .get_episode_ratings()
            .await
            .context("Failed to fetch remote episode ratings")?;
        info!(
            "Remote: {} watched movies, {} movie ratings, {} show ratings, {} episode ratings",
            watched_movies.len(),
            movie_ratings.len(),
            show_ratings.len(),
            episode_ratings.len()
        );

        info!("Fetching local catalog");
        let local_movies = self
            .local
            .get_movies(&self.config.plex.movie_libraries)
            .await
            .context("Failed to fetch local movies")?;
        let local_shows = self
            .local
            .get_shows(&self.config.plex.show_libraries)
            .await
            .context("Failed to fetch local shows")?;
        let local_episodes = self
            .local
            .get_episodes(&self.config.plex.show_libraries)
            .await
            .context("Failed to fetch local episodes")?;
        info!(
            "Local: {} movies, {} shows, {} episodes",
            local_movies.len(),
            local_shows.len(),
            local_episodes.len()
        );

        if !dry_run {
            self.record_snapshots(
                &watched_movies,
                &[
                    movie_ratings.as_slice(),
                    show_ratings.as_slice(),
                    episode_ratings.as_slice(),
                ],
            )?;
        }

        // Phase 2+3: index and diff. Watched reconciliation is movie-only;
        // shows and episodes reconcile ratings.
        let movie_watched_index = SnapshotIndex::build(&watched_movies);
        let movie_rating_index = SnapshotIndex::build(&movie_ratings);
        let show_rating_index = SnapshotIndex::build(&show_ratings);
        let episode_rating_index = SnapshotIndex::build(&episode_ratings);

        let movie_plan = plan_mutations(
            &local_movies,
            Some(&movie_watched_index),
            &movie_rating_index,
            &self.config.sync,
        );
        let show_plan = plan_mutations(&local_shows, None, &show_rating_index, &self.config.sync);
        let episode_plan = plan_mutations(
            &local_episodes,
            None,
            &episode_rating_index,
            &self.config.sync,
        );

        result.unmatched = movie_plan.unmatched + show_plan.unmatched + episode_plan.unmatched;

        let history = HistoryRequest {
            movies: movie_plan.mark_watched_remote,
            episodes: episode_plan.mark_watched_remote,
        };
        let ratings_request = RatingsRequest {
            movies: movie_plan.rate_remote,
            shows: show_plan.rate_remote,
            episodes: episode_plan.rate_remote,
        };
        let local_watch_marks: Vec<MediaItem> = movie_plan
            .mark_watched_local
            .into_iter()
            .chain(episode_plan.mark_watched_local)
            .collect();
        let local_ratings: Vec<(MediaItem, u8)> = movie_plan
            .rate_local
            .into_iter()
            .chain(show_plan.rate_local)
            .chain(episode_plan.rate_local)
            .collect();

        info!(
            "Plan: {} history entries and {} ratings for remote; {} watched marks and {} ratings for local; {} unmatched",
            history.len(),
            ratings_request.len(),
            local_watch_marks.len(),
            local_ratings.len(),
            result.unmatched
        );

        if dry_run {
            result.added_to_trakt = history.len() as u32;
            result.added_to_plex = local_watch_marks.len() as u32;
            result.ratings_synced = (ratings_request.len() + local_ratings.len()) as u32;
            result.duration = start.elapsed();
            info!("Dry run: no changes applied");
            return Ok(result);
        }

        // Phase 4: apply. Remote batches go first; a failed batch means
        // "not applied" and the run continues with the remaining work.
        if !history.is_empty() {
            match self.remote.add_to_history(&history).await {
                Ok(outcome) => result.added_to_trakt += outcome.total(),
                Err(e) => result.push_error(format!("History batch not applied: {}", e)),
            }
        }
        if !ratings_request.is_empty() {
            match self.remote.add_ratings(&ratings_request).await {
                Ok(outcome) => result.ratings_synced += outcome.total(),
                Err(e) => result.push_error(format!("Ratings batch not applied: {}", e)),
            }
        }

        for item in &local_watch_marks {
            match self.local.mark_watched(item).await {
                Ok(()) => result.added_to_plex += 1,
                Err(e) => {
                    result.push_error(format!("Failed to mark '{}' watched: {}", item.title, e))
                }
            }
        }
        for (item, rating) in &local_ratings {
            match self.local.set_rating(item, *rating).await {
                Ok(()) => result.ratings_synced += 1,
                Err(e) => result.push_error(format!("Failed to rate '{}': {}", item.title, e)),
            }
        }

        self.cache
            .put_sync_state("last_sync_completed", &Utc::now().to_rfc3339())?;

        result.duration = start.elapsed();
        Ok(result)
    }

    /// Write the fetched snapshots back into the cache: identity mappings
    /// for every entry with a canonical id, plus the short-TTL watched and
    /// rating rows.
    fn record_snapshots(
        &mut self,
        watched: &[WatchedEntry],
        rating_sets: &[&[RatingEntry]],
    ) -> Result<()> {
        let mut id_rows = Vec::new();
        let mut watched_rows = Vec::new();
        let mut rating_rows = Vec::new();

        for entry in watched {
            if let Some(trakt_id) = entry.ids.trakt {
                collect_id_rows(&entry.ids, &entry.media_type, trakt_id, &mut id_rows);
                watched_rows.push((
                    trakt_id,
                    entry.media_type.clone(),
                    serde_json::to_value(entry)?,
                ));
            }
        }
        for set in rating_sets {
            for entry in *set {
                if let Some(trakt_id) = entry.ids.trakt {
                    collect_id_rows(&entry.ids, &entry.media_type, trakt_id, &mut id_rows);
                    rating_rows.push((
                        trakt_id,
                        entry.media_type.clone(),
                        entry.rating,
                        entry.rated_at.map(|t| t.timestamp()),
                    ));
                }
            }
        }

        self.cache.bulk_put_canonical_ids(&id_rows)?;
        self.cache.bulk_put_watched(&watched_rows)?;
        self.cache.bulk_put_ratings(&rating_rows)?;
        debug!(
            "Cached {} id mappings, {} watched rows, {} rating rows",
            id_rows.len(),
            watched_rows.len(),
            rating_rows.len()
        );
        Ok(())
    }
}

fn collect_id_rows(
    ids: &MediaIds,
    media_type: &MediaType,
    trakt_id: u64,
    rows: &mut Vec<(IdNamespace, String, MediaType, u64)>,
) {
    if let Some(ref imdb) = ids.imdb {
        rows.push((IdNamespace::Imdb, imdb.clone(), media_type.clone(), trakt_id));
    }
    if let Some(tmdb) = ids.tmdb {
        rows.push((
            IdNamespace::Tmdb,
            tmdb.to_string(),
            media_type.clone(),
            trakt_id,
        ));
    }
    if let Some(tvdb) = ids.tvdb {
        rows.push((
            IdNamespace::Tvdb,
            tvdb.to_string(),
            media_type.clone(),
            trakt_id,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use watchsync_config::CacheConfig;
    use watchsync_models::{BatchOutcome, HistoryEntry, RatingUpload};

    #[derive(Default)]
    struct FakeRemote {
        watched_movies: Mutex<Vec<WatchedEntry>>,
        movie_ratings: Mutex<Vec<RatingEntry>>,
        show_ratings: Mutex<Vec<RatingEntry>>,
        episode_ratings: Mutex<Vec<RatingEntry>>,
        history_calls: Mutex<Vec<HistoryRequest>>,
        rating_calls: Mutex<Vec<RatingsRequest>>,
        fail_writes: bool,
    }

    fn watched_from_history(entry: &HistoryEntry, media_type: MediaType) -> WatchedEntry {
        WatchedEntry {
            title: entry.title.clone(),
            year: entry.year,
            media_type,
            ids: entry.ids.clone(),
            plays: 1,
            last_watched_at: entry.watched_at,
        }
    }

    fn rating_from_upload(upload: &RatingUpload, media_type: MediaType) -> RatingEntry {
        RatingEntry {
            title: upload.title.clone(),
            year: upload.year,
            media_type,
            ids: upload.ids.clone(),
            rating: upload.rating,
            rated_at: None,
        }
    }

    #[async_trait]
    impl RemoteTracker for FakeRemote {
        async fn get_watched_movies(&self) -> Result<Vec<WatchedEntry>> {
            Ok(self.watched_movies.lock().unwrap().clone())
        }

        async fn get_movie_ratings(&self) -> Result<Vec<RatingEntry>> {
            Ok(self.movie_ratings.lock().unwrap().clone())
        }

        async fn get_show_ratings(&self) -> Result<Vec<RatingEntry>> {
            Ok(self.show_ratings.lock().unwrap().clone())
        }

        async fn get_episode_ratings(&self) -> Result<Vec<RatingEntry>> {
            Ok(self.episode_ratings.lock().unwrap().clone())
        }

        async fn add_to_history(&self, request: &HistoryRequest) -> Result<BatchOutcome> {
            self.history_calls.lock().unwrap().push(request.clone());
            if self.fail_writes {
                anyhow::bail!("server error 503");
            }
            let mut watched = self.watched_movies.lock().unwrap();
            for entry in &request.movies {
                watched.push(watched_from_history(entry, MediaType::Movie));
            }
            Ok(BatchOutcome {
                movies: request.movies.len() as u32,
                shows: 0,
                episodes: request.episodes.len() as u32,
            })
        }

        async fn add_ratings(&self, request: &RatingsRequest) -> Result<BatchOutcome> {
            self.rating_calls.lock().unwrap().push(request.clone());
            if self.fail_writes {
                anyhow::bail!("server error 503");
            }
            for upload in &request.movies {
                self.movie_ratings
                    .lock()
                    .unwrap()
                    .push(rating_from_upload(upload, MediaType::Movie));
            }
            for upload in &request.shows {
                self.show_ratings
                    .lock()
                    .unwrap()
                    .push(rating_from_upload(upload, MediaType::Show));
            }
            for upload in &request.episodes {
                self.episode_ratings.lock().unwrap().push(rating_from_upload(
                    upload,
                    MediaType::Episode {
                        season: 1,
                        episode: 1,
                    },
                ));
            }
            Ok(BatchOutcome {
                movies: request.movies.len() as u32,
                shows: request.shows.len() as u32,
                episodes: request.episodes.len() as u32,
            })
        }
    }

    #[derive(Default)]
    struct FakeLocal {
        movies: Mutex<Vec<MediaItem>>,
        shows: Mutex<Vec<MediaItem>>,
        episodes: Mutex<Vec<MediaItem>>,
        fail_titles: HashSet<String>,
        watch_marks: Mutex<Vec<String>>,
        ratings_set: Mutex<Vec<(String, u8)>>,
    }

    #[async_trait]
    impl LocalCatalog for FakeLocal {
        async fn get_movies(&self, _libraries: &[String]) -> Result<Vec<MediaItem>> {
            Ok(self.movies.lock().unwrap().clone())
        }

        async fn get_shows(&self, _libraries: &[String]) -> Result<Vec<MediaItem>> {
            Ok(self.shows.lock().unwrap().clone())
        }

        async fn get_episodes(&self, _libraries: &[String]) -> Result<Vec<MediaItem>> {
            Ok(self.episodes.lock().unwrap().clone())
        }

        async fn mark_watched(&self, item: &MediaItem) -> Result<()> {
            if self.fail_titles.contains(&item.title) {
                anyhow::bail!("server refused");
            }
            self.watch_marks.lock().unwrap().push(item.title.clone());
            for movie in self.movies.lock().unwrap().iter_mut() {
                if movie.ids == item.ids {
                    movie.watched = true;
                    movie.plays = 1;
                }
            }
            Ok(())
        }

        async fn set_rating(&self, item: &MediaItem, rating: u8) -> Result<()> {
            if self.fail_titles.contains(&item.title) {
                anyhow::bail!("server refused");
            }
            self.ratings_set
                .lock()
                .unwrap()
                .push((item.title.clone(), rating));
            for movie in self.movies.lock().unwrap().iter_mut() {
                if movie.ids == item.ids {
                    movie.rating = Some(rating);
                }
            }
            Ok(())
        }
    }

    fn imdb_ids(imdb: &str) -> MediaIds {
        MediaIds {
            imdb: Some(imdb.to_string()),
            plex_rating_key: Some(format!("key-{}", imdb)),
            ..Default::default()
        }
    }

    fn local_movie(title: &str, imdb: &str, watched: bool, rating: Option<u8>) -> MediaItem {
        MediaItem {
            title: title.to_string(),
            year: Some(1994),
            media_type: MediaType::Movie,
            ids: imdb_ids(imdb),
            watched,
            watched_at: None,
            plays: u32::from(watched),
            rating,
        }
    }

    fn remote_watched(title: &str, imdb: &str, trakt: u64) -> WatchedEntry {
        WatchedEntry {
            title: title.to_string(),
            year: Some(1994),
            media_type: MediaType::Movie,
            ids: MediaIds {
                imdb: Some(imdb.to_string()),
                trakt: Some(trakt),
                ..Default::default()
            },
            plays: 1,
            last_watched_at: None,
        }
    }

    fn test_cache() -> SyncCache {
        SyncCache::open_in_memory(&CacheConfig::default()).unwrap()
    }

    async fn run_engine(
        config: &Config,
        remote: &FakeRemote,
        local: &FakeLocal,
        cache: &mut SyncCache,
        dry_run: bool,
    ) -> SyncResult {
        SyncEngine::new(config, remote, local, cache)
            .run(dry_run)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn watched_local_only_movie_is_marked_remotely() {
        let config = Config::default();
        let remote = FakeRemote::default();
        let local = FakeLocal::default();
        local
            .movies
            .lock()
            .unwrap()
            .push(local_movie("The Shawshank Redemption", "tt0111161", true, None));
        let mut cache = test_cache();

        let result = run_engine(&config, &remote, &local, &mut cache, false).await;

        assert_eq!(result.added_to_trakt, 1);
        assert_eq!(result.added_to_plex, 0);
        assert_eq!(result.ratings_synced, 0);
        assert!(result.errors.is_empty());

        let calls = remote.history_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].movies.len(), 1);
        assert_eq!(calls[0].movies[0].ids.imdb.as_deref(), Some("tt0111161"));
        assert!(remote.rating_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn n_marks_produce_exactly_one_history_call() {
        let config = Config::default();
        let remote = FakeRemote::default();
        let local = FakeLocal::default();
        for i in 0..5 {
            local.movies.lock().unwrap().push(local_movie(
                &format!("Movie {}", i),
                &format!("tt000000{}", i),
                true,
                None,
            ));
        }
        let mut cache = test_cache();

        let result = run_engine(&config, &remote, &local, &mut cache, false).await;

        assert_eq!(result.added_to_trakt, 5);
        let calls = remote.history_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].movies.len(), 5);
    }

    #[tokio::test]
    async fn second_run_plans_nothing() {
        let config = Config::default();
        let remote = FakeRemote::default();
        remote
            .watched_movies
            .lock()
            .unwrap()
            .push(remote_watched("Ronin", "tt0122690", 5));
        let local = FakeLocal::default();
        {
            let mut movies = local.movies.lock().unwrap();
            movies.push(local_movie("Heat", "tt0113277", true, Some(9)));
            movies.push(local_movie("Ronin", "tt0122690", false, None));
        }
        let mut cache = test_cache();

        let first = run_engine(&config, &remote, &local, &mut cache, false).await;
        assert_eq!(first.added_to_trakt, 1);
        assert_eq!(first.added_to_plex, 1);
        assert_eq!(first.ratings_synced, 1);

        // Both fakes applied the writes to their own state, so re-diffing
        // yields an empty mutation set and no further calls.
        let second = run_engine(&config, &remote, &local, &mut cache, false).await;
        assert_eq!(second.added_to_trakt, 0);
        assert_eq!(second.added_to_plex, 0);
        assert_eq!(second.ratings_synced, 0);
        assert_eq!(remote.history_calls.lock().unwrap().len(), 1);
        assert_eq!(remote.rating_calls.lock().unwrap().len(), 1);
        assert_eq!(local.watch_marks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_computes_the_same_plan_with_zero_writes() {
        let config = Config::default();

        let make_fixtures = || {
            let remote = FakeRemote::default();
            remote
                .watched_movies
                .lock()
                .unwrap()
                .push(remote_watched("Ronin", "tt0122690", 5));
            let local = FakeLocal::default();
            {
                let mut movies = local.movies.lock().unwrap();
                movies.push(local_movie("Heat", "tt0113277", true, Some(9)));
                movies.push(local_movie("Ronin", "tt0122690", false, None));
            }
            (remote, local)
        };

        let (remote, local) = make_fixtures();
        let mut cache = test_cache();
        let dry = run_engine(&config, &remote, &local, &mut cache, true).await;

        // No observable writes anywhere.
        assert!(dry.dry_run);
        assert!(remote.history_calls.lock().unwrap().is_empty());
        assert!(remote.rating_calls.lock().unwrap().is_empty());
        assert!(local.watch_marks.lock().unwrap().is_empty());
        assert!(local.ratings_set.lock().unwrap().is_empty());
        let stats = cache.stats().unwrap();
        assert_eq!(stats.id_mappings + stats.watched + stats.ratings + stats.sync_state, 0);

        // Identical mutation counts to a real run over the same state.
        let (remote, local) = make_fixtures();
        let mut cache = test_cache();
        let wet = run_engine(&config, &remote, &local, &mut cache, false).await;
        assert_eq!(dry.added_to_trakt, wet.added_to_trakt);
        assert_eq!(dry.added_to_plex, wet.added_to_plex);
        assert_eq!(dry.ratings_synced, wet.ratings_synced);
    }

    #[tokio::test]
    async fn local_mutation_failures_are_isolated_per_item() {
        let config = Config::default();
        let remote = FakeRemote::default();
        {
            let mut watched = remote.watched_movies.lock().unwrap();
            watched.push(remote_watched("Heat", "tt0113277", 1));
            watched.push(remote_watched("Ronin", "tt0122690", 2));
        }
        let mut local = FakeLocal::default();
        local.fail_titles.insert("Heat".to_string());
        {
            let mut movies = local.movies.lock().unwrap();
            movies.push(local_movie("Heat", "tt0113277", false, None));
            movies.push(local_movie("Ronin", "tt0122690", false, None));
        }
        let mut cache = test_cache();

        let result = run_engine(&config, &remote, &local, &mut cache, false).await;

        assert_eq!(result.added_to_plex, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Heat"));
    }

    #[tokio::test]
    async fn remote_batch_failure_is_recorded_and_run_continues() {
        let config = Config::default();
        let remote = FakeRemote {
            fail_writes: true,
            ..Default::default()
        };
        remote
            .watched_movies
            .lock()
            .unwrap()
            .push(remote_watched("Ronin", "tt0122690", 5));
        let local = FakeLocal::default();
        {
            let mut movies = local.movies.lock().unwrap();
            movies.push(local_movie("Heat", "tt0113277", true, None));
            movies.push(local_movie("Ronin", "tt0122690", false, None));
        }
        let mut cache = test_cache();

        let result = run_engine(&config, &remote, &local, &mut cache, false).await;

        // The failed batch counts nothing; local work still applied.
        assert_eq!(result.added_to_trakt, 0);
        assert_eq!(result.added_to_plex, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("not applied"));
    }

    #[tokio::test]
    async fn show_and_episode_ratings_share_one_batch_call() {
        let config = Config::default();
        let remote = FakeRemote::default();
        let local = FakeLocal::default();
        local.shows.lock().unwrap().push(MediaItem {
            media_type: MediaType::Show,
            ..local_movie("The Wire", "tt0306414", false, Some(10))
        });
        local.episodes.lock().unwrap().push(MediaItem {
            media_type: MediaType::Episode {
                season: 3,
                episode: 11,
            },
            ..local_movie("The Wire: Middle Ground", "tt0763091", true, Some(10))
        });
        let mut cache = test_cache();

        let result = run_engine(&config, &remote, &local, &mut cache, false).await;

        assert_eq!(result.ratings_synced, 2);
        let calls = remote.rating_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].shows.len(), 1);
        assert_eq!(calls[0].episodes.len(), 1);
        assert!(calls[0].movies.is_empty());
    }

    #[tokio::test]
    async fn snapshots_are_written_back_to_the_cache() {
        let config = Config::default();
        let remote = FakeRemote::default();
        remote.watched_movies.lock().unwrap().push(WatchedEntry {
            ids: MediaIds {
                imdb: Some("tt0113277".to_string()),
                tmdb: Some(949),
                trakt: Some(77),
                ..Default::default()
            },
            ..remote_watched("Heat", "tt0113277", 77)
        });
        let local = FakeLocal::default();
        let mut cache = test_cache();

        run_engine(&config, &remote, &local, &mut cache, false).await;

        assert_eq!(
            cache
                .get_canonical_id(IdNamespace::Imdb, "tt0113277", &MediaType::Movie)
                .unwrap(),
            Some(77)
        );
        assert_eq!(
            cache
                .get_canonical_id(IdNamespace::Tmdb, "949", &MediaType::Movie)
                .unwrap(),
            Some(77)
        );
        assert!(cache.get_watched_status(77).unwrap().is_some());
        assert!(cache.get_sync_state("last_sync_completed").unwrap().is_some());
    }
}
