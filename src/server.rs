//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every file endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].  All `/files` routes require
//! an `x-auth-token` header; `/health` and `/metrics` do not.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::errors::GatewayError;
use crate::handlers::files;
use crate::identity::Caller;
use crate::metadata::store::FileId;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Header carrying the caller's token.
pub const AUTH_HEADER: &str = "x-auth-token";

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.server.max_upload_size).unwrap_or(usize::MAX);

    let mut router = Router::new()
        // Health check endpoint.
        .route("/health", get(health_check))
        .route("/files", get(handle_list))
        .route("/files/upload", post(handle_upload))
        .route("/files/shuffle", post(handle_shuffle))
        .route("/files/cleanup", post(handle_cleanup))
        .route("/files/:id", get(handle_download).delete(handle_delete))
        .route("/files/:id/restore", post(handle_restore));

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // auth_middleware is innermost (closest to handlers, after routing).
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        // metrics_middleware sees every request, rejected ones included.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics"];

/// Token authentication middleware.
///
/// Resolves `x-auth-token` to a [`Caller`] and stores it in the request
/// extensions.  Missing token is 401, unknown token is 403.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if AUTH_SKIP_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let token = req
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let Some(token) = token else {
        return auth_error(StatusCode::UNAUTHORIZED, "Missing auth token");
    };

    match state.identities.resolve(&token).await {
        Some(caller) => {
            debug!(caller = %caller.name, "request authenticated");
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        None => auth_error(StatusCode::FORBIDDEN, "Invalid token"),
    }
}

fn auth_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Route dispatch ----------------------------------------------------------

/// Record ids that do not parse cannot name a record.
fn parse_id(raw: &str) -> Result<FileId, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::not_found("File not found"))
}

/// `POST /files/upload`
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    files::upload_file(state, caller, multipart).await
}

/// `GET /files`
async fn handle_list(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<Response, GatewayError> {
    files::list_files(state, caller).await
}

/// `GET /files/:id`
async fn handle_download(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    files::download_file(state, caller, parse_id(&id)?).await
}

/// `DELETE /files/:id`
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    files::delete_file(state, caller, parse_id(&id)?).await
}

/// `POST /files/:id/restore`
async fn handle_restore(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    files::restore_file(state, parse_id(&id)?).await
}

/// `POST /files/shuffle`
async fn handle_shuffle(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    files::shuffle_files(state).await
}

/// `POST /files/cleanup`
async fn handle_cleanup(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    files::cleanup_files(state).await
}
