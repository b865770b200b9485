use axum::{routing::get, Router};

pub mod jobs;
pub mod system;

/// Router for all endpoints that need a caller identity.
pub fn router() -> Router {
    Router::new()
        .route("/usage", get(system::usage))
        .nest("/jobs", jobs::router())
}
