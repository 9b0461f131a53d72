use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::TraktError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<Client, TraktError> {
    Ok(Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Device authorization handle returned by the code endpoint.
///
/// The user visits `verification_url` and types `user_code`; the application
/// polls the token endpoint with `device_code` every `interval` seconds until
/// the code expires.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenInfo {
    fn from_response(response: TokenResponse) -> Self {
        // Renew two minutes early so a token never expires mid-run.
        let expires_at =
            Utc::now() + ChronoDuration::seconds(response.expires_in as i64 - 120);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        }
    }
}

/// Start the device authorization flow.
pub async fn request_device_code(
    base_url: &str,
    client_id: &str,
) -> Result<DeviceCode, TraktError> {
    let client = http_client()?;
    let response = client
        .post(format!("{}/oauth/device/code", base_url))
        .header("Content-Type", "application/json")
        .json(&json!({ "client_id": client_id }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TraktError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.json().await?)
}

/// Poll the token endpoint until the user authorizes the device code.
///
/// This loop deliberately bypasses the rate-limit retry wrapper: a `400`
/// here means "authorization pending" rather than an error, and a `429`
/// means "polling too fast" and doubles the wait for the next poll.
/// `404`/`410`/`418` are terminal denials; running past the code's expiry
/// window is a terminal timeout.
pub async fn poll_device_token(
    base_url: &str,
    client_id: &str,
    client_secret: &str,
    device: &DeviceCode,
) -> Result<TokenInfo, TraktError> {
    let client = http_client()?;
    let deadline = Instant::now() + Duration::from_secs(device.expires_in);
    let interval = device.interval.max(1);

    loop {
        if Instant::now() >= deadline {
            return Err(TraktError::AuthorizationTimeout);
        }

        let response = client
            .post(format!("{}/oauth/device/token", base_url))
            .header("Content-Type", "application/json")
            .json(&json!({
                "code": device.device_code,
                "client_id": client_id,
                "client_secret": client_secret,
            }))
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let token: TokenResponse = response.json().await?;
                info!("Device authorization granted");
                return Ok(TokenInfo::from_response(token));
            }
            400 => {
                // Authorization pending.
                debug!("Device authorization pending, polling again in {}s", interval);
                sleep(Duration::from_secs(interval)).await;
            }
            429 => {
                debug!("Polling too fast, backing off to {}s", interval * 2);
                sleep(Duration::from_secs(interval * 2)).await;
            }
            404 | 410 | 418 => return Err(TraktError::AuthorizationDenied),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(TraktError::Status { status, body });
            }
        }
    }
}

/// Exchange a refresh token for a fresh access token.
pub async fn refresh_access_token(
    base_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenInfo, TraktError> {
    let client = http_client()?;
    let response = client
        .post(format!("{}/oauth/token", base_url))
        .header("Content-Type", "application/json")
        .json(&json!({
            "refresh_token": refresh_token,
            "client_id": client_id,
            "client_secret": client_secret,
            "grant_type": "refresh_token",
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TraktError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let token: TokenResponse = response.json().await?;
    Ok(TokenInfo::from_response(token))
}
