use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::info;

use crate::error::TraktError;
use crate::traits::RemoteTracker;
use crate::trakt::api::TraktHttpClient;
use crate::trakt::auth::{self, DeviceCode, TokenInfo};
use watchsync_config::{CredentialStore, PathManager, TraktConfig};
use watchsync_models::{
    BatchOutcome, HistoryRequest, RatingEntry, RatingsRequest, WatchedEntry,
};

/// Remote tracker adapter: token lifecycle on top of the batch HTTP client.
pub struct TraktClient {
    http: TraktHttpClient,
    client_id: String,
    client_secret: String,
    credentials_file: std::path::PathBuf,
    authenticated: bool,
}

impl TraktClient {
    pub fn new(config: &TraktConfig, paths: &PathManager) -> Result<Self> {
        let http = TraktHttpClient::new(config.client_id.clone())?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            credentials_file: paths.credentials_file(),
            authenticated: false,
        })
    }

    /// Authenticate from stored credentials, refreshing when the saved token
    /// is expired or about to expire. Fails with `NotAuthenticated` when no
    /// usable credential exists; the login flow is a separate, interactive
    /// step.
    pub async fn authenticate(&mut self) -> Result<()> {
        let mut store = CredentialStore::new(self.credentials_file.clone());
        store.load()?;

        if let (Some(token), Some(expires_at)) = (
            store.get_trakt_access_token(),
            store.get_trakt_token_expires(),
        ) {
            if expires_at > Utc::now() + Duration::minutes(5) {
                self.http.set_access_token(token.clone());
                self.authenticated = true;
                info!("Using saved trakt access token (expires at {})", expires_at);
                return Ok(());
            }
            info!("Saved trakt token expired or expiring soon, refreshing");
        }

        let refresh_token = store
            .get_trakt_refresh_token()
            .cloned()
            .ok_or(TraktError::NotAuthenticated)?;

        let token = auth::refresh_access_token(
            self.http.base_url(),
            &self.client_id,
            &self.client_secret,
            &refresh_token,
        )
        .await
        .context("Token refresh failed; run login again")?;

        self.store_tokens(&mut store, &token)?;
        self.http.set_access_token(token.access_token);
        self.authenticated = true;
        info!("Refreshed trakt access token");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Step one of the interactive login: obtain a device code for the user.
    pub async fn begin_device_auth(&self) -> Result<DeviceCode> {
        let device = auth::request_device_code(self.http.base_url(), &self.client_id).await?;
        Ok(device)
    }

    /// Step two: poll until the user authorizes, then persist the tokens.
    pub async fn finish_device_auth(&mut self, device: &DeviceCode) -> Result<()> {
        let token = auth::poll_device_token(
            self.http.base_url(),
            &self.client_id,
            &self.client_secret,
            device,
        )
        .await?;

        let mut store = CredentialStore::new(self.credentials_file.clone());
        store.load()?;
        self.store_tokens(&mut store, &token)?;

        self.http.set_access_token(token.access_token);
        self.authenticated = true;
        Ok(())
    }

    fn store_tokens(&self, store: &mut CredentialStore, token: &TokenInfo) -> Result<()> {
        store.set_trakt_access_token(token.access_token.clone());
        store.set_trakt_refresh_token(token.refresh_token.clone());
        store.set_trakt_token_expires(token.expires_at);
        store.save()
    }

    pub fn http(&self) -> &TraktHttpClient {
        &self.http
    }
}

#[async_trait]
impl RemoteTracker for TraktClient {
    async fn get_watched_movies(&self) -> Result<Vec<WatchedEntry>> {
        Ok(self.http.get_watched_movies().await?)
    }

    async fn get_movie_ratings(&self) -> Result<Vec<RatingEntry>> {
        Ok(self.http.get_movie_ratings().await?)
    }

    async fn get_show_ratings(&self) -> Result<Vec<RatingEntry>> {
        Ok(self.http.get_show_ratings().await?)
    }

    async fn get_episode_ratings(&self) -> Result<Vec<RatingEntry>> {
        Ok(self.http.get_episode_ratings().await?)
    }

    async fn add_to_history(&self, request: &HistoryRequest) -> Result<BatchOutcome> {
        Ok(self.http.add_to_history(request).await?)
    }

    async fn add_ratings(&self, request: &RatingsRequest) -> Result<BatchOutcome> {
        Ok(self.http.add_ratings(request).await?)
    }
}
