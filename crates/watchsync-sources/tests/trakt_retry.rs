//! Behavior of the rate-limit retry wrapper against a scripted local server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use watchsync_models::{HistoryEntry, HistoryRequest, MediaIds};
use watchsync_sources::trakt::api::TraktHttpClient;
use watchsync_sources::TraktError;

fn http_response(status: u16, reason: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, reason);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    response
}

/// Headers received, plus the full body if a Content-Length was declared.
fn request_complete(data: &[u8]) -> bool {
    let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&data[..header_end]);
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    data.len() >= header_end + 4 + content_length
}

/// Serve one canned response per connection, repeating the last response once
/// the script runs out. Returns the base URL and a request counter.
async fn spawn_scripted_server(script: Vec<String>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));

    let server_hits = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let index = server_hits.fetch_add(1, Ordering::SeqCst);
            let response = script
                .get(index)
                .or_else(|| script.last())
                .cloned()
                .unwrap_or_default();

            tokio::spawn(async move {
                let mut data = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            data.extend_from_slice(&buf[..n]);
                            if request_complete(&data) {
                                break;
                            }
                        }
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (base_url, hits)
}

fn client_for(base_url: &str) -> TraktHttpClient {
    let mut client = TraktHttpClient::with_base_url("client-id".to_string(), base_url).unwrap();
    client.set_access_token("token".to_string());
    client
}

#[tokio::test]
async fn rate_limited_request_retries_then_succeeds() {
    let rate_limited = http_response(
        429,
        "Too Many Requests",
        &[("Retry-After", "0")],
        "",
    );
    let ok = http_response(200, "OK", &[], "[]");
    let (base_url, hits) =
        spawn_scripted_server(vec![rate_limited.clone(), rate_limited, ok]).await;

    let client = client_for(&base_url);
    let start = Instant::now();
    let entries = client.get_watched_movies().await.unwrap();

    assert!(entries.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // Two backoff sleeps of Retry-After + 1 = 1s each.
    assert!(start.elapsed().as_millis() >= 2000);
}

#[tokio::test]
async fn rate_limit_budget_exhaustion_is_a_typed_error() {
    let rate_limited = http_response(429, "Too Many Requests", &[("Retry-After", "0")], "");
    let (base_url, hits) = spawn_scripted_server(vec![rate_limited]).await;

    let client = client_for(&base_url);
    let error = client.get_watched_movies().await.unwrap_err();

    assert!(matches!(error, TraktError::RateLimited { retry_after: 0 }));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_rate_limit_errors_fail_without_retry() {
    let failure = http_response(500, "Internal Server Error", &[], "boom");
    let (base_url, hits) = spawn_scripted_server(vec![failure]).await;

    let client = client_for(&base_url);
    let error = client.get_watched_movies().await.unwrap_err();

    match error {
        TraktError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_write_payload_short_circuits_without_network() {
    // Nothing is listening here; a network attempt would error out.
    let client = client_for("http://127.0.0.1:9");
    let outcome = client.add_to_history(&HistoryRequest::default()).await.unwrap();
    assert_eq!(outcome.total(), 0);
}

#[tokio::test]
async fn history_batch_is_one_request() {
    let ok = http_response(200, "OK", &[], r#"{"added":{"movies":2,"episodes":0}}"#);
    let (base_url, hits) = spawn_scripted_server(vec![ok]).await;

    let client = client_for(&base_url);
    let request = HistoryRequest {
        movies: vec![
            HistoryEntry {
                title: "Heat".to_string(),
                year: Some(1995),
                ids: MediaIds {
                    imdb: Some("tt0113277".to_string()),
                    ..Default::default()
                },
                watched_at: None,
            },
            HistoryEntry {
                title: "Ronin".to_string(),
                year: Some(1998),
                ids: MediaIds {
                    imdb: Some("tt0122690".to_string()),
                    ..Default::default()
                },
                watched_at: None,
            },
        ],
        episodes: Vec::new(),
    };

    let outcome = client.add_to_history(&request).await.unwrap();
    assert_eq!(outcome.movies, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
