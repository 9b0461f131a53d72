use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::output::{Output, OutputFormat};
use watchsync_config::{Config, CredentialStore, PathManager};
use watchsync_core::{SyncCache, SyncEngine};
use watchsync_models::SyncResult;
use watchsync_sources::plex::PlexClient;
use watchsync_sources::trakt::TraktClient;

pub async fn run_sync(dry_run: bool, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories()?;
    let config = Config::load(&paths)?;

    if !config.trakt.is_configured() {
        return Err(anyhow!(
            "Trakt credentials not configured. Run 'watchsync login' first."
        ));
    }
    if !config.plex.is_configured() {
        return Err(anyhow!(
            "Plex server not configured. Run 'watchsync setup' first."
        ));
    }

    let mut trakt = TraktClient::new(&config.trakt, &paths)?;
    trakt
        .authenticate()
        .await
        .context("Trakt authentication failed. Run 'watchsync login' again")?;

    let mut credentials = CredentialStore::new(paths.credentials_file());
    credentials.load()?;
    let plex_token = credentials
        .get_plex_token()
        .cloned()
        .ok_or_else(|| anyhow!("Plex token not stored. Run 'watchsync setup' first."))?;
    let plex = PlexClient::new(&config.plex, &plex_token)?;

    let mut cache = SyncCache::open(&paths.cache_db_file(), &config.cache)?;

    let spinner = if output.format() == OutputFormat::Human && !output.is_quiet() {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(if dry_run { "Computing sync plan..." } else { "Syncing..." });
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    } else {
        None
    };

    let result = SyncEngine::new(&config, &trakt, &plex, &mut cache)
        .run(dry_run)
        .await;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    let result = result?;
    report(&result, output);
    Ok(())
}

fn report(result: &SyncResult, output: &Output) {
    match output.format() {
        OutputFormat::Human => {
            if result.dry_run {
                output.info("Dry run - no changes applied");
            } else {
                output.success("Sync complete");
            }
            output.println(format!("  Added to Trakt:  {}", result.added_to_trakt));
            output.println(format!("  Added to Plex:   {}", result.added_to_plex));
            output.println(format!("  Ratings synced:  {}", result.ratings_synced));
            if result.unmatched > 0 {
                output.println(format!("  Unmatched items: {}", result.unmatched));
            }
            output.println(format!(
                "  Duration:        {:.1}s",
                result.duration.as_secs_f64()
            ));

            if !result.errors.is_empty() {
                output.warn(format!("Errors ({}):", result.total_errors()));
                for error in &result.errors {
                    output.println(format!("  - {}", error));
                }
                if result.errors_truncated > 0 {
                    output.println(format!("  ... and {} more", result.errors_truncated));
                }
            }
        }
        _ => {
            output.json(&serde_json::to_value(result).unwrap_or_default());
        }
    }
}
