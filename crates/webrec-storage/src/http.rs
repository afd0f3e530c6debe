//! Bearer-authenticated JSON fetching with bounded retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 5xx and 429 are transient; every other non-success status fails fast.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
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
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_account_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub pacing: Option<RatePacing>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_account_concurrency: 8,
            backoff: BackoffPolicy::default(),
            pacing: None,
        }
    }
}

/// Client-side pacing: at most `burst` calls back to back, then one per `interval`.
#[derive(Debug, Clone, Copy)]
pub struct RatePacing {
    pub burst: u32,
    pub interval: Duration,
}

/// Hands out call slots on a fixed cadence, letting an idle client bank up to `burst` of them.
#[derive(Debug)]
pub struct CallPacer {
    pacing: RatePacing,
    next_slot: Mutex<Instant>,
}

impl CallPacer {
    pub fn new(pacing: RatePacing) -> Self {
        Self {
            pacing,
            next_slot: Mutex::new(Self::earliest_slot(pacing, Instant::now())),
        }
    }

    fn earliest_slot(pacing: RatePacing, now: Instant) -> Instant {
        let banked = pacing.interval.saturating_mul(pacing.burst.saturating_sub(1));
        now.checked_sub(banked).unwrap_or(now)
    }

    /// Wait until this caller's slot comes up.
    pub async fn wait_turn(&self) {
        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let earliest = Self::earliest_slot(self.pacing, now);
            if *next < earliest {
                *next = earliest;
            }
            let slot = *next;
            *next = slot + self.pacing.interval;
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub attempts: usize,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.final_url.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after {attempts} attempt(s): {source}")]
    Request {
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("http fetcher is shutting down")]
    Closed,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_account_limit: usize,
    per_account: Mutex<HashMap<String, Arc<Semaphore>>>,
    pacer: Option<CallPacer>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_account_limit: config.per_account_concurrency.max(1),
            per_account: Mutex::new(HashMap::new()),
            pacer: config.pacing.map(CallPacer::new),
            backoff: config.backoff,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    async fn per_account_semaphore(&self, account_key: &str) -> Arc<Semaphore> {
        let mut map = self.per_account.lock().await;
        map.entry(account_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_account_limit)))
            .clone()
    }

    /// GET `url` with a bearer token, retrying transient failures per the backoff policy.
    pub async fn get_with_bearer(
        &self,
        account_key: &str,
        url: &str,
        bearer_token: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_account = self.per_account_semaphore(account_key).await;
        let _account = per_account.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", account_key, url);
        self.get_with_retries(url, bearer_token).instrument(span).await
    }

    async fn get_with_retries(
        &self,
        url: &str,
        bearer_token: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            if let Some(pacer) = &self.pacer {
                pacer.wait_turn().await;
            }

            let resp_result = self
                .client
                .get(url)
                .bearer_auth(bearer_token)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await;
            let can_retry = attempt < self.backoff.max_retries;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp
                            .bytes()
                            .await
                            .map_err(|source| FetchError::Request {
                                attempts: attempt + 1,
                                source,
                            })?
                            .to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                            attempts: attempt + 1,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable && can_retry {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(
                            status = status.as_u16(),
                            attempt,
                            ?delay,
                            "transient status; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    debug!(status = status.as_u16(), "giving up on non-success status");
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body: body.chars().take(512).collect(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && can_retry {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        warn!(error = %err, attempt, ?delay, "request error; retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request {
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }
        }
    }
}
