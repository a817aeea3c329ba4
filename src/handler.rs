use std::sync::Arc;

use axum::http::Method;
use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::{ApiResponse, SignInRequest};
use crate::db::Database;
use crate::feed::ChangeFeed;
use crate::session::SessionHub;
use crate::{created, error_response, success};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: Arc<SessionHub>,
    pub feed: Arc<ChangeFeed>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(healthcheck))
        .route(
            "/auth/session",
            post(sign_in).get(current_session).delete(sign_out),
        )
        .nest("/bookmarks", crate::bookmarks::routes())
        .layer(cors)
        .with_state(state)
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(ApiResponse { data: "ok" })
}

/// OAuth callback boundary: accepts provider-verified claims and mints the
/// service's own bearer token. The exchange itself happens upstream.
pub async fn sign_in(State(state): State<AppState>, Json(payload): Json<SignInRequest>) -> Response {
    match state.sessions.sign_in(payload).await {
        Ok(session) => created(session),
        Err(e) => {
            tracing::warn!("sign-in rejected: {}", e);
            error_response(&e)
        }
    }
}

pub async fn current_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state.sessions.authenticate(&headers).await {
        Ok(session) => success(session),
        Err(e) => error_response(&e),
    }
}

pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match state.sessions.authenticate(&headers).await {
        Ok(session) => session,
        Err(e) => return error_response(&e),
    };

    state.sessions.sign_out(&session.token).await;
    success(serde_json::json!({ "signed_out": session.user_id }))
}
