//! Control API: route registration, shared application state, and the
//! global middleware stack (CORS, body limits, timeouts, tracing).
//! Handlers themselves live in [`public`], [`user`], [`admin`], and
//! [`internal`]; principal resolution lives in [`auth`].

pub mod admin;
pub mod auth;
pub mod error;
pub mod internal;
pub mod metrics;
pub mod public;
pub mod user;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use airwave_control::arbiter::LivestreamArbiter;
use airwave_control::mixer::QueueSocket;
use airwave_control::queue::QueueController;
use airwave_control::webhook::WebhookDispatcher;
use airwave_core::jwt::JwtService;
use airwave_core::{Catalog, Config, StateStore};

pub use error::{AppError, AppResult};

/// Shared application state handed to every handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Catalog,
    pub queue: Arc<QueueController>,
    pub arbiter: Arc<LivestreamArbiter>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub jwt: Arc<JwtService>,
    pub user_socket: Arc<dyn QueueSocket>,
    pub fallback_socket: Arc<dyn QueueSocket>,
    pub state_store: StateStore,
}

/// Builds the complete router, mounted at `/api`, with every global layer
/// applied and state bound.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .merge(register_public_routes())
        .merge(register_user_routes(&state))
        .merge(register_admin_routes(&state))
        .merge(register_internal_routes(&state));

    if state.config.server.metrics_enabled {
        app = app.route("/api/metrics", get(metrics::metrics));
    }

    apply_global_layers(app, &state)
}

/// Unauthenticated routes: queue/recordings browsing, the now-playing
/// projection, and the liveness/readiness probes.
fn register_public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/queue/list", get(public::list_queue))
        .route("/api/recordings/list", get(public::list_recordings))
        .route("/api/recordings/stream/{id}", get(public::stream_recording))
        .route("/api/metadata/now", get(public::now_playing))
        .route("/api/health", get(public::health))
        .route("/api/health/ready", get(public::health_ready))
}

/// Routes requiring a verified `user` JWT.
fn register_user_routes(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/queue/add", post(user::add_song))
        .route("/api/queue/{song_id}", delete(user::delete_song))
}

/// Routes requiring an `ADMIN_API_TOKEN` bearer.
fn register_admin_routes(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/admin/token", post(admin::issue_user_token))
        .route("/api/admin/livestream/token", post(admin::issue_livestream_token))
        .route("/api/admin/queue/add", post(admin::add_song))
        .route("/api/admin/queue/list", get(admin::list_queue))
        .route("/api/admin/queue/{song_id}", delete(admin::delete_song))
        .route("/api/admin/queue/clear", post(admin::clear_queue))
        .route("/api/admin/playback/play", post(admin::play))
        .route("/api/admin/playback/pause", post(admin::pause))
        .route("/api/admin/playback/resume", post(admin::resume))
        .route("/api/admin/recordings/{id}", delete(admin::delete_recording))
        .route("/api/admin/webhooks/subscribe", post(admin::subscribe_webhook))
        .route("/api/admin/webhooks/list", get(admin::list_webhooks))
        .route("/api/admin/webhooks/{id}", delete(admin::unsubscribe_webhook))
        .route("/api/admin/webhooks/{id}/deliveries", get(admin::webhook_deliveries))
        .route("/api/admin/webhooks/{id}/stats", get(admin::webhook_stats))
        .route("/api/admin/webhooks/{id}/test", post(admin::test_webhook))
}

/// Routes requiring `INTERNAL_API_TOKEN`, reached only by the mixer.
fn register_internal_routes(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/internal/livestream/auth", post(internal::auth))
        .route("/api/internal/livestream/connect", post(internal::connect))
        .route("/api/internal/livestream/disconnect", post(internal::disconnect))
        .route("/api/internal/livestream/metadata", post(internal::metadata))
}

/// Builds the CORS layer from `server.cors_allowed_origins`; development
/// mode allows any origin/method/header, matching a local frontend dev
/// server running off a different port.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.development_mode {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if config.server.cors_allowed_origins.is_empty() {
        tracing::warn!(
            "CORS: no allowed origins configured in production; all cross-origin requests will be denied"
        );
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = config
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::header::ACCEPT,
            ])
            .allow_credentials(true)
    }
}

/// Applies CORS, a body-size cap derived from `queue.max_file_size_bytes`,
/// a request timeout, and HTTP tracing, then binds `state`.
fn apply_global_layers(router: Router<AppState>, state: &AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let body_limit = usize::try_from(state.config.queue.max_file_size_bytes).unwrap_or(usize::MAX);
    let metrics_enabled = state.config.server.metrics_enabled;

    let router = router
        .layer(cors)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(30),
        ))
        .layer(axum_middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http());

    let router = if metrics_enabled {
        router.layer(axum_middleware::from_fn(metrics::track_http_metrics))
    } else {
        router
    };

    router.with_state(state.clone())
}

async fn security_headers(
    request: axum::extract::Request,
    next: axum_middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    response
}
