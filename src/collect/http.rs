// src/collect/http.rs
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::CollectConfig;
use crate::error::FetchError;

pub const USER_AGENT: &str = concat!(
    "biodata-growth/",
    env!("CARGO_PKG_VERSION"),
    " (+growth statistics dashboard)"
);

/// Shared HTTP client: per-request timeout plus retries with exponential
/// backoff on transient failures (connect errors, timeouts, 429, 5xx).
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    max_attempts: u8,
    base_delay: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration, max_attempts: u8, base_delay: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("building http client: {e}")))?;
        Ok(Self::with_client(client, max_attempts, base_delay))
    }

    pub fn with_client(client: Client, max_attempts: u8, base_delay: Duration) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(cfg: &CollectConfig) -> Result<Self, FetchError> {
        Self::new(cfg.request_timeout(), cfg.max_attempts, cfg.retry_base_delay())
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u8) -> Duration {
        let shift = u32::from(attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }

    /// Send the request produced by `build`, retrying transient failures.
    /// Any other non-2xx status is an [`FetchError::UpstreamFormat`] carrying
    /// the status and URL.
    pub async fn send<F>(&self, what: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let resp = self.send_raw(what, build).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(FetchError::upstream(format!(
            "{what}: HTTP {status} from {}",
            resp.url()
        )))
    }

    /// Like [`HttpClient::send`], but a non-transient status comes back as the
    /// response itself so the caller can give it a meaning (e.g. 404 = unknown).
    pub async fn send_raw<F>(&self, what: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let err = match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !is_transient(status) {
                        return Ok(resp);
                    }
                    FetchError::Network(format!("{what}: HTTP {status} from {}", resp.url()))
                }
                Err(e) => classify(what, e),
            };

            if !err.is_retriable() || attempt >= self.max_attempts {
                return Err(err);
            }
            let delay = self.backoff(attempt);
            tracing::debug!(
                what,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.send(url, |c| c.get(url)).await?;
        read_text(url, resp).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        parse_json(url, &body)
    }
}

pub async fn read_text(what: &str, resp: Response) -> Result<String, FetchError> {
    resp.text().await.map_err(|e| classify(what, e))
}

pub fn parse_json<T: DeserializeOwned>(what: &str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body)
        .map_err(|e| FetchError::upstream(format!("{what}: unexpected JSON: {e}")))
}

/// Join a base URL and a relative path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn classify(what: &str, e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::upstream(format!("{what}: {e}"))
    } else {
        FetchError::Network(format!("{what}: {e}"))
    }
}
