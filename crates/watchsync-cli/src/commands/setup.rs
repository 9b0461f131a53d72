use anyhow::{Context, Result};
use dialoguer::Input;

use crate::output::Output;
use watchsync_config::{Config, CredentialStore, PathManager};
use watchsync_sources::plex::PlexClient;

pub async fn run_setup(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories()?;
    let mut config = Config::load(&paths)?;

    output.info("Plex server configuration");
    output.println("");

    let server_url: String = Input::new()
        .with_prompt("Plex server URL")
        .default(if config.plex.server_url.is_empty() {
            "http://localhost:32400".to_string()
        } else {
            config.plex.server_url.clone()
        })
        .interact_text()
        .context("Failed to read server URL")?;

    let token: String = Input::new()
        .with_prompt("Plex token")
        .interact_text()
        .context("Failed to read token")?;

    config.plex.server_url = server_url.trim().trim_end_matches('/').to_string();
    config.save(&paths)?;

    let mut credentials = CredentialStore::new(paths.credentials_file());
    credentials.load()?;
    credentials.set_plex_token(token.trim().to_string());
    credentials.save()?;

    output.success("Plex configuration saved");

    output.info("Testing connection...");
    let plex = PlexClient::new(&config.plex, token.trim())?;
    match plex.check_connection().await {
        Ok(name) => output.success(format!("Connected to: {}", name)),
        Err(e) => output.error(format!("Connection failed: {}", e)),
    }

    Ok(())
}
