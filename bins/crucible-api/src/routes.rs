// Route definitions for the Crucible API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/submissions",
            post(handlers::submit_job).get(handlers::list_jobs),
        )
        .route("/submissions/:id", get(handlers::get_job))
        .route("/health", get(handlers::health))
        .route("/languages", get(handlers::list_languages))
}
