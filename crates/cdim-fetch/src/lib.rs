//! HTTP fetch utilities for the country dimension pipeline.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{info_span, warn};

use cdim_core::RawPayload;

pub const CRATE_NAME: &str = "cdim-fetch";

/// Source tag stamped on every payload envelope and raw sink row.
pub const SOURCE_ID: &str = "restcountries";

pub const DEFAULT_ENDPOINT: &str = "https://restcountries.com/v3.1/all";

/// Reduced field projection requested from the source API.
pub const FIELDS: &str =
    "cca2,name,region,subregion,capital,population,area,independent,landlocked,flags";

/// Longest body prefix carried in fetch errors.
pub const BODY_EXCERPT_LIMIT: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Transient statuses worth another attempt. Everything else, including
/// the remaining 4xx/5xx codes, fails the run immediately.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status.as_u16() {
        429 | 500 | 502 | 503 | 504 => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_transport_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded, lossy prefix of a response body for error diagnostics.
pub fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(BODY_EXCERPT_LIMIT).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: "cdim-etl/0.1 (+https://localhost)".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-retryable status; the request is not reissued.
    #[error("http status {status} for {url}: {excerpt}")]
    Http {
        status: u16,
        url: String,
        excerpt: String,
    },
    /// All attempts consumed on transient failures.
    #[error("fetch exhausted after {attempts} attempts (last status {last_status:?}): {excerpt}")]
    Exhausted {
        attempts: usize,
        last_status: Option<u16>,
        excerpt: String,
    },
    /// Body did not deserialize to a JSON array. Never retried.
    #[error("unexpected response shape (expected a JSON array): {0}")]
    MalformedResponse(#[source] serde_json::Error),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    url: String,
    backoff: BackoffPolicy,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;
        let url = format!("{}?fields={}", config.endpoint, FIELDS);
        Ok(Self {
            client,
            url,
            backoff: config.backoff,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One GET against the source endpoint, retried per the backoff policy
    /// on transport failures and transient statuses only.
    pub async fn fetch(&self) -> Result<RawPayload, FetchError> {
        let span = info_span!("http_fetch", source_id = SOURCE_ID, url = %self.url);
        let _guard = span.enter();

        let mut last_status: Option<u16> = None;
        let mut last_excerpt = String::new();

        for attempt in 0..self.backoff.max_attempts {
            let resp_result = self
                .client
                .get(&self.url)
                .header(header::ACCEPT, "application/json")
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.bytes().await?;

                    if status.is_success() {
                        return parse_payload(&body);
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Http {
                            status: status.as_u16(),
                            url: final_url,
                            excerpt: body_excerpt(&body),
                        });
                    }

                    last_status = Some(status.as_u16());
                    last_excerpt = body_excerpt(&body);
                    if attempt + 1 < self.backoff.max_attempts {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(status = status.as_u16(), attempt, ?delay, "transient status, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    if classify_transport_error(&err) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Transport(err));
                    }
                    last_status = None;
                    last_excerpt = err.to_string();
                    if attempt + 1 < self.backoff.max_attempts {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(error = %last_excerpt, attempt, ?delay, "transport failure, retrying");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.backoff.max_attempts,
            last_status,
            excerpt: last_excerpt,
        })
    }
}

/// The source contract is a JSON array of country objects; anything else
/// is a data contract violation, not a transient failure.
fn parse_payload(body: &[u8]) -> Result<RawPayload, FetchError> {
    let data: Vec<Value> =
        serde_json::from_slice(body).map_err(FetchError::MalformedResponse)?;
    Ok(RawPayload::new(SOURCE_ID, data))
}
