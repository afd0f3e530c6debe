//! Upstream webinar-platform API contract, HTTP client, and fixture-backed client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use webrec_core::{ActualData, OccurrenceRecord, SourceTag, WebinarRecord};
use webrec_storage::{FetchError, HttpFetcher};

mod fixture;
pub mod parse;

pub use fixture::{load_fixture_bundle, FixtureBundle, FixtureResponse, FixtureWebinarApi};

pub const CRATE_NAME: &str = "webrec-adapters";

pub const DEFAULT_BASE_URL: &str = "https://api.zoom.us/v2";

/// Per-request credentials and listing window for one owner's sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiContext {
    pub account_id: String,
    pub platform_user_id: String,
    pub access_token: String,
    pub history_from: NaiveDate,
    pub history_to: NaiveDate,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("http status {status} for {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("unexpected response from {endpoint}: {message}")]
    Shape { endpoint: String, message: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Fetch(err) => err.status(),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Shape { .. } => None,
        }
    }
}

/// Platform endpoints consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    UpcomingListing { user_id: String },
    HistoricalListing { user_id: String, from: NaiveDate, to: NaiveDate },
    AccountListing { user_id: String },
    WebinarDetail { webinar_id: String },
    PastInstances { webinar_id: String },
    PastOccurrence { identifier: String },
    InstanceDetail { webinar_id: String, occurrence_id: String },
}

pub const LISTING_PAGE_SIZE: u32 = 300;

impl Endpoint {
    pub fn listing(source: SourceTag, ctx: &ApiContext) -> Option<Self> {
        let user_id = ctx.platform_user_id.clone();
        match source {
            SourceTag::Upcoming => Some(Self::UpcomingListing { user_id }),
            SourceTag::Historical => Some(Self::HistoricalListing {
                user_id,
                from: ctx.history_from,
                to: ctx.history_to,
            }),
            SourceTag::Account => Some(Self::AccountListing { user_id }),
            SourceTag::Detail => None,
        }
    }

    /// Request path relative to the API base url, query string included.
    pub fn path(&self) -> String {
        match self {
            Self::UpcomingListing { user_id } => format!(
                "/users/{}/webinars?type=upcoming&page_size={LISTING_PAGE_SIZE}",
                encode_segment(user_id)
            ),
            Self::HistoricalListing { user_id, from, to } => format!(
                "/report/users/{}/webinars?from={}&to={}&page_size={LISTING_PAGE_SIZE}",
                encode_segment(user_id),
                from.format("%Y-%m-%d"),
                to.format("%Y-%m-%d")
            ),
            Self::AccountListing { user_id } => format!(
                "/users/{}/webinars?page_size={LISTING_PAGE_SIZE}",
                encode_segment(user_id)
            ),
            Self::WebinarDetail { webinar_id } => format!(
                "/webinars/{}?show_previous_occurrences=true",
                encode_segment(webinar_id)
            ),
            Self::PastInstances { webinar_id } => {
                format!("/past_webinars/{}/instances", encode_segment(webinar_id))
            }
            Self::PastOccurrence { identifier } => {
                format!("/past_webinars/{}", encode_identifier(identifier))
            }
            Self::InstanceDetail { webinar_id, occurrence_id } => format!(
                "/webinars/{}?occurrence_id={}",
                encode_segment(webinar_id),
                encode_segment(occurrence_id)
            ),
        }
    }
}

fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// UUIDs that begin with `/` or contain `//` must be encoded twice.
pub fn encode_identifier(raw: &str) -> String {
    let once = encode_segment(raw);
    if raw.starts_with('/') || raw.contains("//") {
        encode_segment(&once)
    } else {
        once
    }
}

#[async_trait]
pub trait WebinarApi: Send + Sync {
    /// One listing surface, all pages.
    async fn list_webinars(
        &self,
        ctx: &ApiContext,
        source: SourceTag,
    ) -> Result<Vec<WebinarRecord>, ApiError>;

    /// Parent record including its scheduled `occurrences`.
    async fn get_webinar(
        &self,
        ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<WebinarRecord, ApiError>;

    async fn list_past_instances(&self, ctx: &ApiContext, webinar_id: &str)
        -> Result<Vec<OccurrenceRecord>, ApiError>;

    /// Completed-occurrence detail addressed by uuid or numeric id.
    async fn get_past_occurrence(
        &self,
        ctx: &ApiContext,
        identifier: &str,
    ) -> Result<ActualData, ApiError>;

    async fn get_instance_detail(
        &self,
        ctx: &ApiContext,
        webinar_id: &str,
        occurrence_id: &str,
    ) -> Result<ActualData, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpWebinarApi {
    http: Arc<HttpFetcher>,
    base_url: String,
    max_pages: usize,
}

impl HttpWebinarApi {
    pub fn new(http: Arc<HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_pages: 10,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn get_json(&self, ctx: &ApiContext, path: &str) -> Result<JsonValue, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get_with_bearer(&ctx.account_id, &url, &ctx.access_token)
            .await?;
        debug!(path, attempts = response.attempts, "upstream call succeeded");
        Ok(response.json()?)
    }
}

#[async_trait]
impl WebinarApi for HttpWebinarApi {
    async fn list_webinars(
        &self,
        ctx: &ApiContext,
        source: SourceTag,
    ) -> Result<Vec<WebinarRecord>, ApiError> {
        let endpoint = Endpoint::listing(source, ctx).ok_or_else(|| ApiError::Shape {
            endpoint: source.to_string(),
            message: "source has no listing endpoint".to_string(),
        })?;
        let base_path = endpoint.path();
        let mut out = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 0..self.max_pages {
            let path = match &next_token {
                Some(token) => format!("{base_path}&next_page_token={}", encode_segment(token)),
                None => base_path.clone(),
            };
            let body = self.get_json(ctx, &path).await?;
            let parsed = parse::parse_listing_page(&body, source);
            out.extend(parsed.webinars);
            next_token = parsed.next_page_token;
            if next_token.is_none() {
                break;
            }
            if page + 1 == self.max_pages {
                warn!(
                    %source,
                    pages = self.max_pages,
                    "listing page cap reached; results truncated"
                );
            }
        }
        Ok(out)
    }

    async fn get_webinar(
        &self,
        ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<WebinarRecord, ApiError> {
        let path = Endpoint::WebinarDetail {
            webinar_id: webinar_id.to_string(),
        }
        .path();
        let body = self.get_json(ctx, &path).await?;
        Ok(parse::parse_webinar(&body, SourceTag::Detail))
    }

    async fn list_past_instances(
        &self,
        ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<Vec<OccurrenceRecord>, ApiError> {
        let path = Endpoint::PastInstances {
            webinar_id: webinar_id.to_string(),
        }
        .path();
        let body = self.get_json(ctx, &path).await?;
        Ok(parse::parse_past_instances(&body))
    }

    async fn get_past_occurrence(
        &self,
        ctx: &ApiContext,
        identifier: &str,
    ) -> Result<ActualData, ApiError> {
        let path = Endpoint::PastOccurrence {
            identifier: identifier.to_string(),
        }
        .path();
        let body = self.get_json(ctx, &path).await?;
        Ok(parse::parse_actual_data(&body))
    }

    async fn get_instance_detail(
        &self,
        ctx: &ApiContext,
        webinar_id: &str,
        occurrence_id: &str,
    ) -> Result<ActualData, ApiError> {
        let path = Endpoint::InstanceDetail {
            webinar_id: webinar_id.to_string(),
            occurrence_id: occurrence_id.to_string(),
        }
        .path();
        let body = self.get_json(ctx, &path).await?;
        Ok(parse::parse_instance_detail(&body, occurrence_id))
    }
}
