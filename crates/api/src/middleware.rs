use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use jobgate_core::UserId;

use crate::app::errors::json_error;
use crate::context::RequesterContext;

/// Header carrying the already-authenticated caller id (set by the upstream gateway).
pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn identity_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id = extract_user_id(req.headers())
        .map_err(|message| json_error(StatusCode::BAD_REQUEST, "invalid_user", message))?;

    req.extensions_mut().insert(RequesterContext::new(user_id));

    Ok(next.run(req).await)
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(USER_ID_HEADER)
        .ok_or("missing user id")?;

    let header = header.to_str().map_err(|_| "invalid user id")?;
    if header.trim().is_empty() {
        return Err("missing user id");
    }

    header.parse().map_err(|_| "invalid user id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_id_header_is_required_and_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_user_id(&headers), Err("missing user id"));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(extract_user_id(&headers), Err("missing user id"));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(extract_user_id(&headers), Err("invalid user id"));

        let user = UserId::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        assert_eq!(extract_user_id(&headers), Ok(user));
    }
}
