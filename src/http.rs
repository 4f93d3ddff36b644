//! JSON-over-HTTP with bounded retries.
//!
//! Shared by the embedding and generation clients:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)
//!
//! Every attempt, body read included, is bounded by `timeout`.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
}

/// POST `body` to `url` and return the decoded JSON response.
///
/// The error string is ready to be wrapped in an engine error by the
/// caller; `service` names the remote end in messages.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    policy: &RetryPolicy,
) -> Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(policy.timeout, send_once(client, url, bearer, body)).await {
            Ok(Ok(json)) => return Ok(json),
            Ok(Err(Failure::Fatal(msg))) => return Err(format!("{} error: {}", service, msg)),
            Ok(Err(Failure::Transient(msg))) => {
                warn!(service, attempt, error = %msg, "request failed, will retry");
                last_err = Some(msg);
            }
            Err(_) => {
                warn!(service, attempt, "request timed out, will retry");
                last_err = Some(format!("timed out after {:?}", policy.timeout));
            }
        }
    }

    Err(format!(
        "{} failed after {} attempts: {}",
        service,
        policy.max_retries + 1,
        last_err.unwrap_or_else(|| "unknown error".to_string())
    ))
}

enum Failure {
    Transient(String),
    Fatal(String),
}

async fn send_once(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value, Failure> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(token) = bearer {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .map_err(|e| Failure::Transient(format!("connection error to {}: {}", url, e)))?;
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| Failure::Fatal(format!("invalid JSON response: {}", e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 || status.is_server_error() {
        Err(Failure::Transient(format!("HTTP {}: {}", status, body_text)))
    } else {
        Err(Failure::Fatal(format!("HTTP {}: {}", status, body_text)))
    }
}

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_reports_attempts() {
        let policy = RetryPolicy {
            max_retries: 0,
            timeout: Duration::from_secs(2),
        };
        let c = client(policy.timeout).unwrap();
        // Port 9 (discard) on localhost is almost never listening.
        let err = post_json(
            &c,
            "test",
            "http://127.0.0.1:9/none",
            None,
            &serde_json::json!({}),
            &policy,
        )
        .await
        .unwrap_err();
        assert!(err.contains("failed after 1 attempts"), "{}", err);
    }
}
