use log::{debug, error};
use std::convert::Infallible;
use warp::filters::body::BodyDeserializeError;
use warp::http::header::RETRY_AFTER;
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::Rejection;

use crate::error::MurmurError;
use crate::handlers::filters::RateLimitExceeded;
use crate::handlers::posts::{error_reply, json_reply, ErrorBody};

fn status_reply(status: StatusCode, message: impl Into<String>) -> Response {
    json_reply(
        &ErrorBody {
            error: message.into(),
        },
        status,
    )
}

/// Turn any rejection into a JSON error reply
pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let response = if let Some(limited) = rejection.find::<RateLimitExceeded>() {
        let mut response = error_reply(&MurmurError::RateLimited);
        // Round up so a client waiting this long is admitted
        let secs = limited.retry_after.as_secs() + u64::from(limited.retry_after.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
        response
    } else if let Some(err) = rejection.find::<MurmurError>() {
        error_reply(err)
    } else if let Some(e) = rejection.find::<BodyDeserializeError>() {
        debug!("Bad request body: {}", e);
        status_reply(StatusCode::BAD_REQUEST, format!("Invalid input: {}", e))
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        status_reply(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        status_reply(StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        status_reply(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected a JSON request body",
        )
    } else if rejection.find::<warp::reject::InvalidHeader>().is_some() {
        status_reply(StatusCode::BAD_REQUEST, "Invalid request header")
    } else if rejection.is_not_found() {
        status_reply(StatusCode::NOT_FOUND, "Not found")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        status_reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else if let Some(e) = rejection.find::<warp::filters::cors::CorsForbidden>() {
        status_reply(StatusCode::FORBIDDEN, e.to_string())
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        status_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(response)
}
