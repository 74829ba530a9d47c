//! HTTP handlers for the board API
//!
//! Handlers never reject: domain errors become JSON error replies here.
//! Only guard filters reject, and those are rendered by
//! [`crate::handlers::rejection::handle_rejection`].

use log::error;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::RETRY_AFTER;
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::Reply;

use crate::core::server::BoardServer;
use crate::error::{MurmurError, Result};
use crate::storage::PostId;

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub value: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub id: PostId,
    pub new_score: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

pub fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

/// JSON error reply carrying the client-safe message
pub fn error_reply(err: &MurmurError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    let mut response = json_reply(
        &ErrorBody {
            error: err.public_message(),
        },
        status,
    );
    if err.is_retryable() {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

fn respond<T: Serialize>(result: Result<T>, status: StatusCode) -> Response {
    match result {
        Ok(body) => json_reply(&body, status),
        Err(e) => error_reply(&e),
    }
}

pub fn parse_post_id(raw: &str) -> Result<PostId> {
    raw.parse::<PostId>()
        .map_err(|_| MurmurError::InvalidInput("Invalid post ID".to_string()))
}

pub async fn list_posts(board: Arc<BoardServer>) -> std::result::Result<Response, Infallible> {
    Ok(respond(board.list_posts().await, StatusCode::OK))
}

pub async fn trending_posts(board: Arc<BoardServer>) -> std::result::Result<Response, Infallible> {
    Ok(respond(board.trending_posts().await, StatusCode::OK))
}

pub async fn create_post(
    request: CreatePostRequest,
    board: Arc<BoardServer>,
) -> std::result::Result<Response, Infallible> {
    Ok(respond(
        board.create_post(request.content).await,
        StatusCode::CREATED,
    ))
}

pub async fn vote(
    raw_id: String,
    request: VoteRequest,
    board: Arc<BoardServer>,
) -> std::result::Result<Response, Infallible> {
    let result = match parse_post_id(&raw_id) {
        Ok(post_id) => board.vote(post_id, request.value).await.map(|outcome| VoteResponse {
            id: outcome.post_id,
            new_score: outcome.new_score,
        }),
        Err(e) => Err(e),
    };
    Ok(respond(result, StatusCode::OK))
}

pub async fn delete_post(
    raw_id: String,
    board: Arc<BoardServer>,
) -> std::result::Result<Response, Infallible> {
    let result = match parse_post_id(&raw_id) {
        Ok(post_id) => board.hide_post(post_id).await.map(|()| MessageBody {
            message: "Post hidden successfully",
        }),
        Err(e) => Err(e),
    };
    Ok(respond(result, StatusCode::OK))
}

pub async fn health(board: Arc<BoardServer>) -> std::result::Result<Response, Infallible> {
    let health = board.health().await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(json_reply(&health, status))
}
