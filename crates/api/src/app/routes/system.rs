use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequesterContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Current usage and allowances for the caller.
pub async fn usage(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
) -> axum::response::Response {
    match services.submissions.usage(requester.user_id()).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}
