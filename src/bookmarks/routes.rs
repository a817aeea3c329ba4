use axum::{
    Router,
    routing::{delete, get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list_bookmarks))
        .route("/", post(handler::create_bookmark))
        .route("/stats", get(handler::get_stats))
        .route("/feed", get(handler::feed))
        .route("/live", get(handler::live))
        .route("/:id", delete(handler::delete_bookmark))
}
