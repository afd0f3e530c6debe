//! Fixture-first client: serves captured platform responses from a bundle file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use webrec_core::{ActualData, OccurrenceRecord, SourceTag, WebinarRecord};

use crate::{parse, ApiContext, ApiError, Endpoint, WebinarApi};

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub account_id: String,
    pub platform_user_id: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Keyed by request path; lookups fall back to the path without its query string.
    pub responses: BTreeMap<String, FixtureResponse>,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct FixtureWebinarApi {
    bundle: FixtureBundle,
}

impl FixtureWebinarApi {
    pub fn new(bundle: FixtureBundle) -> Self {
        Self { bundle }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_bundle(path)?))
    }

    pub fn bundle(&self) -> &FixtureBundle {
        &self.bundle
    }

    fn respond(&self, endpoint: &Endpoint) -> Result<&JsonValue, ApiError> {
        let path = endpoint.path();
        let bare = path.split('?').next().unwrap_or(&path);
        let response = self
            .bundle
            .responses
            .get(&path)
            .or_else(|| self.bundle.responses.get(bare))
            .ok_or_else(|| ApiError::Status {
                status: 404,
                endpoint: path.clone(),
            })?;
        if !(200..300).contains(&response.status) {
            return Err(ApiError::Status {
                status: response.status,
                endpoint: path,
            });
        }
        Ok(&response.body)
    }
}

#[async_trait]
impl WebinarApi for FixtureWebinarApi {
    async fn list_webinars(
        &self,
        ctx: &ApiContext,
        source: SourceTag,
    ) -> Result<Vec<WebinarRecord>, ApiError> {
        let endpoint = Endpoint::listing(source, ctx).ok_or_else(|| ApiError::Shape {
            endpoint: source.to_string(),
            message: "source has no listing endpoint".to_string(),
        })?;
        let body = self.respond(&endpoint)?;
        Ok(parse::parse_listing_page(body, source).webinars)
    }

    async fn get_webinar(
        &self,
        _ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<WebinarRecord, ApiError> {
        let body = self.respond(&Endpoint::WebinarDetail {
            webinar_id: webinar_id.to_string(),
        })?;
        Ok(parse::parse_webinar(body, SourceTag::Detail))
    }

    async fn list_past_instances(
        &self,
        _ctx: &ApiContext,
        webinar_id: &str,
    ) -> Result<Vec<OccurrenceRecord>, ApiError> {
        let body = self.respond(&Endpoint::PastInstances {
            webinar_id: webinar_id.to_string(),
        })?;
        Ok(parse::parse_past_instances(body))
    }

    async fn get_past_occurrence(
        &self,
        _ctx: &ApiContext,
        identifier: &str,
    ) -> Result<ActualData, ApiError> {
        let body = self.respond(&Endpoint::PastOccurrence {
            identifier: identifier.to_string(),
        })?;
        Ok(parse::parse_actual_data(body))
    }

    async fn get_instance_detail(
        &self,
        _ctx: &ApiContext,
        webinar_id: &str,
        occurrence_id: &str,
    ) -> Result<ActualData, ApiError> {
        let body = self.respond(&Endpoint::InstanceDetail {
            webinar_id: webinar_id.to_string(),
            occurrence_id: occurrence_id.to_string(),
        })?;
        Ok(parse::parse_instance_detail(body, occurrence_id))
    }
}
