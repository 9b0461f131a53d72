use anyhow::{Context, Result};
use dialoguer::Input;

use crate::output::Output;
use watchsync_config::{Config, PathManager};
use watchsync_sources::trakt::TraktClient;

pub async fn run_login(output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories()?;
    let mut config = Config::load(&paths)?;

    if !config.trakt.is_configured() {
        output.info("Trakt API credentials required.");
        output.info("Create an application at https://trakt.tv/oauth/applications");
        output.println("");

        let client_id: String = Input::new()
            .with_prompt("Client ID")
            .interact_text()
            .context("Failed to read client id")?;
        let client_secret: String = Input::new()
            .with_prompt("Client Secret")
            .interact_text()
            .context("Failed to read client secret")?;

        config.trakt.client_id = client_id.trim().to_string();
        config.trakt.client_secret = client_secret.trim().to_string();
        config.save(&paths)?;
    }

    let mut trakt = TraktClient::new(&config.trakt, &paths)?;

    let device = trakt
        .begin_device_auth()
        .await
        .context("Failed to start device authorization")?;

    output.println("");
    output.info(format!("Go to:      {}", device.verification_url));
    output.info(format!("Enter code: {}", device.user_code));
    output.println("");
    output.info("Waiting for authorization...");

    trakt
        .finish_device_auth(&device)
        .await
        .context("Device authorization failed")?;

    output.success("Authenticated with Trakt");
    Ok(())
}
