//! Axum JSON API for triggering syncs and inspecting their results.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};
use webrec_sync::{
    build_service_from_env, maybe_build_scheduler, SyncConfig, SyncError, SyncRequest, SyncService,
};

pub const CRATE_NAME: &str = "webrec-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    /// Spawn an enrichment pass after a sync whose quality report asks for one.
    pub auto_enrich: bool,
}

impl AppState {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self {
            service,
            auto_enrich: false,
        }
    }

    pub fn with_auto_enrich(mut self, auto_enrich: bool) -> Self {
        self.auto_enrich = auto_enrich;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrichRequest {
    owner_id: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sync", post(sync_handler))
        .route("/api/enrich", post(enrich_handler))
        .route("/api/quality/{owner_id}", get(quality_handler))
        .route("/api/sync/history/{owner_id}", get(history_handler))
        .route("/api/diagnostics", get(diagnostics_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let service = Arc::new(build_service_from_env(&config).await?);
    if let Some(sched) = maybe_build_scheduler(service.clone(), &config).await? {
        sched.start().await?;
        info!(
            cron = %config.sync_cron,
            owners = config.scheduled_owners.len(),
            "scheduler started"
        );
    }
    let state = AppState::new(service).with_auto_enrich(config.auto_enrich);
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok", "service": CRATE_NAME })).into_response()
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SyncRequest>,
) -> Response {
    if request.owner_id.trim().is_empty() {
        return bad_request("ownerId is required");
    }
    match state.service.trigger(request).await {
        Ok(response) => {
            let wants_enrichment = response
                .quality
                .as_ref()
                .is_some_and(|q| q.recommends_enrichment);
            if state.auto_enrich && wants_enrichment {
                let service = state.service.clone();
                let owner_id = response.owner_id.clone();
                tokio::spawn(async move {
                    if let Err(err) = service.run_enrichment_pass(&owner_id).await {
                        warn!(owner_id = %owner_id, error = %err, "background enrichment failed");
                    }
                });
            }
            Json(response).into_response()
        }
        Err(err) => sync_error(err),
    }
}

async fn enrich_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnrichRequest>,
) -> Response {
    if request.owner_id.trim().is_empty() {
        return bad_request("ownerId is required");
    }
    match state.service.run_enrichment_pass(&request.owner_id).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn quality_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(owner_id): AxumPath<String>,
) -> Response {
    match state.service.quality(&owner_id).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(owner_id): AxumPath<String>,
) -> Response {
    match state.service.sync_history(&owner_id).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn diagnostics_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.diagnostics().events()).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "bad_request", "message": message })),
    )
        .into_response()
}

fn sync_error(err: SyncError) -> Response {
    let status = match &err {
        SyncError::UnknownOwner(_) => StatusCode::NOT_FOUND,
        SyncError::MissingToken(_) | SyncError::TokenExpired { .. } => StatusCode::UNAUTHORIZED,
        SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    (
        status,
        Json(json!({ "error": err.kind(), "message": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    fn fixture_app() -> Router {
        let bundle = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/sample-account/bundle.json");
        let service = webrec_sync::build_fixture_service(&bundle, "owner-1", &SyncConfig::default())
            .unwrap()
            .with_clock(|| Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).single().unwrap());
        app(AppState::new(Arc::new(service)))
    }

    fn post_json(uri: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_health() {
        let resp = fixture_app()
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn sync_returns_camel_case_summary() {
        let app = fixture_app();
        let resp = app
            .clone()
            .oneshot(post_json("/api/sync", r#"{"ownerId":"owner-1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["summary"]["successfulUpserts"], 5);
        assert_eq!(body["summary"]["uniqueWebinars"], 3);
        assert_eq!(body["webinars"].as_array().unwrap().len(), 5);

        let quality = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/quality/owner-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(quality.status(), StatusCode::OK);
        let report = json_body(quality).await;
        assert_eq!(report["total"], 5);
        assert_eq!(report["recommendsEnrichment"], false);
    }

    #[tokio::test]
    async fn sync_for_single_webinar() {
        let resp = fixture_app()
            .oneshot(post_json("/api/sync", r#"{"ownerId":"owner-1","webinarId":"333"}"#))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["summary"]["successfulUpserts"], 1);
        assert_eq!(body["webinars"][0]["webinar_id"], "333");
    }

    #[tokio::test]
    async fn unknown_owner_is_a_top_level_error() {
        let resp = fixture_app()
            .oneshot(post_json("/api/sync", r#"{"ownerId":"someone-else"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["error"], "unknown_owner");
    }

    #[tokio::test]
    async fn blank_owner_is_rejected() {
        let resp = fixture_app()
            .oneshot(post_json("/api/enrich", r#"{"ownerId":"  "}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
