//! HTTP page fetcher.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use rawlake_core::config::FetchConfig;
use rawlake_core::WorkUnit;

use super::backoff::{retry_with_backoff, Attempt, RetryPolicy};
use crate::error::FetchError;

/// Statuses worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Fetches `{base}?date={date}&page={page}` with bounded retry.
pub struct RemoteFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl RemoteFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                Client::new()
            });
        Self::new(client, RetryPolicy::from_config(config))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, base_url: &str, unit: &WorkUnit) -> Result<Value, FetchError> {
        let date = unit.date_string();
        let date = date.as_str();
        retry_with_backoff(&self.policy, |attempt| self.attempt(base_url, date, unit, attempt)).await
    }

    async fn attempt(&self, base_url: &str, date: &str, unit: &WorkUnit, attempt: u32) -> Attempt<Value> {
        debug!(
            source = unit.source(),
            date,
            page = unit.page(),
            attempt,
            url = base_url,
            "Fetching page"
        );

        let page = unit.page().to_string();
        let response = self
            .client
            .get(base_url)
            .query(&[("date", date), ("page", page.as_str())])
            .send()
            .await;

        match response {
            Ok(resp) => classify(resp).await,
            Err(e) if e.is_timeout() || e.is_connect() => Attempt::Transient(format!("transport error: {e}")),
            Err(e) => Attempt::Permanent(format!("request failed: {e}")),
        }
    }
}

async fn classify(resp: reqwest::Response) -> Attempt<Value> {
    let status = resp.status();
    if status == StatusCode::OK {
        return match resp.json::<Value>().await {
            Ok(doc) => Attempt::Success(doc),
            Err(e) if e.is_timeout() => Attempt::Transient(format!("timed out reading body: {e}")),
            Err(e) => Attempt::Permanent(format!("unexpected response body: {e}")),
        };
    }
    if is_transient_status(status) {
        Attempt::Transient(format!("HTTP {status}"))
    } else {
        Attempt::Permanent(format!("HTTP {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_status_set() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_transient_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [200, 201, 204, 301, 400, 401, 403, 404, 501] {
            assert!(!is_transient_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }
}
