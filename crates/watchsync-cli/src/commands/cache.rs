use anyhow::Result;

use crate::output::Output;
use watchsync_config::{Config, PathManager};
use watchsync_core::SyncCache;

pub fn run_prune(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let config = Config::load(&paths)?;

    let mut cache = SyncCache::open(&paths.cache_db_file(), &config.cache)?;
    let removed = cache.prune_expired()?;
    let stats = cache.stats()?;

    output.success(format!("Pruned {} expired cache rows", removed));
    output.println(format!(
        "Remaining: {} id mappings, {} watched, {} ratings, {} sync state",
        stats.id_mappings, stats.watched, stats.ratings, stats.sync_state
    ));
    Ok(())
}

pub fn run_clear_state(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let config = Config::load(&paths)?;

    let mut cache = SyncCache::open(&paths.cache_db_file(), &config.cache)?;
    cache.clear_sync_state()?;

    output.success("Cleared sync state");
    Ok(())
}
