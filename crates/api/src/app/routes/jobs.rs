use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use jobgate_core::JobId;
use jobgate_infra::jobs::JobRequest;

use crate::app::dto::{self, JobView, SubmittedJob};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequesterContext;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/recurring", post(submit_recurring))
        .route("/:id", get(poll_job))
        .route("/:id/access", get(check_access))
        .route("/:id/cancel", post(cancel_job))
}

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Json(body): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    if body.kind.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", "kind is required");
    }

    match services.submissions.submit(requester.user_id(), body.into_request()).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SubmittedJob { job_id })).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn submit_recurring(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Json(body): Json<dto::SubmitRecurringRequest>,
) -> axum::response::Response {
    if body.kind.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", "kind is required");
    }

    let request = JobRequest::new(body.kind, body.payload);
    match services
        .submissions
        .submit_recurring(requester.user_id(), request, body.schedule)
        .await
    {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SubmittedJob { job_id })).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    match services.submissions.list_jobs(requester.user_id(), limit) {
        Ok(jobs) => {
            let items = jobs.into_iter().map(JobView::from).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn poll_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(job_id) = id.parse::<JobId>() else {
        return errors::job_not_found();
    };

    match services.submissions.poll(job_id, requester.user_id()) {
        Ok(job) => (StatusCode::OK, Json(JobView::from(job))).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn check_access(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let allowed = match id.parse::<JobId>() {
        Ok(job_id) => match services.submissions.check_access(job_id, requester.user_id()) {
            Ok(allowed) => allowed,
            Err(e) => return errors::submission_error_to_response(e),
        },
        Err(_) => false,
    };

    (StatusCode::OK, Json(serde_json::json!({ "allowed": allowed }))).into_response()
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(job_id) = id.parse::<JobId>() else {
        return errors::job_not_found();
    };

    match services.submissions.cancel(job_id, requester.user_id()) {
        Ok(job) => (StatusCode::OK, Json(JobView::from(job))).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}
