use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobgate_auth::AccessDecision;
use jobgate_infra::{QuotaKind, SubmissionError};

pub fn submission_error_to_response(err: SubmissionError) -> axum::response::Response {
    match err {
        SubmissionError::InvalidUser(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_user", msg),
        SubmissionError::QuotaExceeded { kind, used, limit } => {
            let code = match kind {
                QuotaKind::Daily => "daily_limit_exceeded",
                QuotaKind::Monthly => "monthly_limit_exceeded",
            };
            (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(json!({
                    "error": code,
                    "message": format!("{kind} usage limit reached, try again later"),
                    "used": used,
                    "limit": limit,
                })),
            )
                .into_response()
        }
        // Never reveal whether someone else's job exists.
        SubmissionError::JobNotFound(_) | SubmissionError::AccessDenied(_) => job_not_found(),
        SubmissionError::InvalidStateTransition(msg) => json_error(StatusCode::CONFLICT, "invalid_state", msg),
        SubmissionError::InvalidRequest(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_request", msg),
        SubmissionError::UsageCheckFailed(_) | SubmissionError::Storage(_) => internal_error(),
    }
}

pub fn job_not_found() -> axum::response::Response {
    // Denied and NotFound share one public shape.
    let denial = AccessDecision::NotFound.public_denial().unwrap_or_default();
    json_error(StatusCode::NOT_FOUND, denial.error, denial.message)
}

pub fn internal_error() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "something went wrong, please retry",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
