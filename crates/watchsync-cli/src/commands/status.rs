use anyhow::Result;
use comfy_table::Table;
use serde_json::json;

use crate::output::{Output, OutputFormat};
use watchsync_config::{Config, CredentialStore, PathManager};
use watchsync_core::SyncCache;

fn mask(value: &str) -> String {
    if value.len() > 8 {
        format!("{}...", &value[..8])
    } else if value.is_empty() {
        "not set".to_string()
    } else {
        "***".to_string()
    }
}

pub async fn run_status(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    let config = Config::load(&paths)?;

    let mut credentials = CredentialStore::new(paths.credentials_file());
    credentials.load()?;
    let trakt_authenticated = credentials.get_trakt_access_token().is_some();
    let plex_token_set = credentials.get_plex_token().is_some();

    let cache_stats = SyncCache::open(&paths.cache_db_file(), &config.cache)
        .and_then(|cache| cache.stats())
        .ok();

    if output.format() != OutputFormat::Human {
        output.json(&json!({
            "trakt": {
                "configured": config.trakt.is_configured(),
                "authenticated": trakt_authenticated,
            },
            "plex": {
                "server_url": config.plex.server_url,
                "token_set": plex_token_set,
            },
            "cache": cache_stats.map(|s| json!({
                "id_mappings": s.id_mappings,
                "watched": s.watched,
                "ratings": s.ratings,
                "sync_state": s.sync_state,
            })),
            "config_dir": paths.config_dir(),
        }));
        return Ok(());
    }

    let mut trakt_table = Table::new();
    trakt_table.set_header(vec!["Trakt", "Value"]);
    trakt_table.add_row(vec!["Client ID".to_string(), mask(&config.trakt.client_id)]);
    trakt_table.add_row(vec![
        "Authenticated",
        if trakt_authenticated { "yes" } else { "no" },
    ]);
    output.println(trakt_table.to_string());

    let server_url = if config.plex.server_url.is_empty() {
        "not set"
    } else {
        config.plex.server_url.as_str()
    };
    let mut plex_table = Table::new();
    plex_table.set_header(vec!["Plex", "Value"]);
    plex_table.add_row(vec!["Server URL", server_url]);
    plex_table.add_row(vec!["Token", if plex_token_set { "set" } else { "not set" }]);
    output.println(plex_table.to_string());

    match cache_stats {
        Some(stats) => {
            let mut cache_table = Table::new();
            cache_table.set_header(vec!["Cache table", "Rows"]);
            cache_table.add_row(vec!["id_mappings".to_string(), stats.id_mappings.to_string()]);
            cache_table.add_row(vec!["watched".to_string(), stats.watched.to_string()]);
            cache_table.add_row(vec!["ratings".to_string(), stats.ratings.to_string()]);
            cache_table.add_row(vec!["sync_state".to_string(), stats.sync_state.to_string()]);
            output.println(cache_table.to_string());
        }
        None => output.warn("Cache not initialized"),
    }

    output.println(format!("Config directory: {:?}", paths.config_dir()));
    Ok(())
}
