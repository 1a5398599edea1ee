//! Gateway: the HTTP + WebSocket surface. Authenticates requests, routes to
//! the document store and registries, and upgrades websocket connections
//! into pub/sub sessions.

pub mod auth;
pub mod envelope;
pub mod http;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderValue};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use triggr_chain::{DecodedEvent, IngestStatus};
use triggr_common::{Config, TriggrError};
use triggr_registry::{ProjectRegistry, TriggerRegistry};
use triggr_store::DocumentStore;

use crate::pubsub::PubSub;
use crate::router::TriggerRouter;
use self::envelope::ApiError;

pub struct AppState {
    pub config: Config,
    pub projects: Arc<ProjectRegistry>,
    pub triggers: Arc<TriggerRegistry>,
    pub docs: Arc<DocumentStore>,
    pub pubsub: Arc<PubSub>,
    pub router: Arc<TriggerRouter>,
    /// Sender half of the router intake; held for queue-depth diagnostics.
    pub intake: mpsc::Sender<DecodedEvent>,
    pub ingest_status: Option<Arc<IngestStatus>>,
    rate_limiter: Mutex<HashMap<String, Vec<Instant>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        projects: Arc<ProjectRegistry>,
        triggers: Arc<TriggerRegistry>,
        docs: Arc<DocumentStore>,
        pubsub: Arc<PubSub>,
        router: Arc<TriggerRouter>,
        intake: mpsc::Sender<DecodedEvent>,
        ingest_status: Option<Arc<IngestStatus>>,
    ) -> Self {
        Self {
            config,
            projects,
            triggers,
            docs,
            pubsub,
            router,
            intake,
            ingest_status,
            rate_limiter: Mutex::new(HashMap::new()),
        }
    }

    /// Sliding one-minute window per API key. A limit of 0 disables.
    pub async fn check_rate_limit(&self, key_digest: &str) -> Result<(), ApiError> {
        let limit = self.config.rate_limit_per_min;
        if limit == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut limiter = self.rate_limiter.lock().await;
        let hits = limiter.entry(key_digest.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        if hits.len() >= limit as usize {
            return Err(ApiError(TriggrError::RateLimited));
        }
        hits.push(now);
        Ok(())
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Console (bearer)
        .route("/api/console/project", post(http::create_project))
        .route("/api/console/projects", get(http::list_projects))
        .route(
            "/api/console/project/{api_key}",
            get(http::get_project).delete(http::delete_project),
        )
        .route("/api/console/diagnostics", get(http::diagnostics))
        // Document store (api-key)
        .route(
            "/api/db/collections",
            get(http::list_collections).post(http::create_collection),
        )
        .route(
            "/api/db/collections/{collection}/docs",
            get(http::list_docs).post(http::insert_doc),
        )
        .route(
            "/api/db/collections/{collection}/docs/{doc_id}",
            get(http::get_doc)
                .put(http::put_doc)
                .patch(http::patch_doc)
                .delete(http::delete_doc),
        )
        // Triggers (api-key)
        .route("/api/trigger", post(http::create_trigger))
        .route("/api/trigger/{contract}", get(http::list_triggers))
        .route(
            "/api/trigger/{contract}/{trigger_id}/state",
            put(http::set_trigger_state),
        )
        .route(
            "/api/trigger/{contract}/{trigger_id}",
            delete(http::delete_trigger),
        )
        // Pub/sub
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method + path + status + latency only; never query params.
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}
