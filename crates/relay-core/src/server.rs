//! Router assembly and shared application state.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::handlers;
use crate::middleware::auth_middleware;
use crate::queue::AdmissionQueue;
use crate::sched::CredentialScheduler;
use crate::store::CredentialStore;
use crate::upstream::{UpstreamClient, UpstreamEngine};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<CredentialStore>,
    pub scheduler: Arc<CredentialScheduler>,
    pub queue: Arc<AdmissionQueue>,
    pub engine: Arc<UpstreamEngine>,
}

impl AppState {
    /// Wire the whole core together. `max_concurrent = "auto"` resolves
    /// against the enabled pool size at this point, so call it after the
    /// credential file is in place.
    pub async fn build(config: AppConfig, store: Arc<CredentialStore>) -> Self {
        let client = Arc::new(UpstreamClient::new(&config.api));
        let scheduler = Arc::new(CredentialScheduler::new(
            store.clone(),
            config.concurrency.per_token_concurrency,
            client.http(),
        ));
        let enabled = scheduler.load().await;
        tracing::info!("Loaded {enabled} enabled credential(s)");

        let max_concurrent = config
            .concurrency
            .max_concurrent
            .resolve(enabled, config.concurrency.per_token_concurrency);
        tracing::info!(
            "Admission queue: {max_concurrent} concurrent, {} queued, {}ms timeout",
            config.concurrency.queue_limit,
            config.concurrency.timeout
        );
        let queue = Arc::new(AdmissionQueue::new(
            max_concurrent,
            config.concurrency.queue_limit,
            config.concurrency.timeout,
        ));

        let engine = Arc::new(UpstreamEngine::new(
            scheduler.clone(),
            client,
            config.retry.clone(),
            config.defaults.clone(),
        ));

        Self { config: Arc::new(config), store, scheduler, queue, engine }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api_key = Arc::new(state.config.security.api_key.clone());
    let body_limit = state.config.security.max_request_size;

    Router::new()
        .route("/v1/models", get(handlers::openai::handle_list_models))
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route("/health", get(handlers::status::handle_health))
        .route("/api/stats", get(handlers::status::handle_stats))
        .route("/api/remark", post(handlers::status::handle_update_remark))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn_with_state(api_key, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
