//! Request handlers for different server endpoints

pub mod filters;
pub mod posts;
pub mod rejection;
pub mod websocket;

use log::info;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

use crate::constants::{ADMIN_TOKEN_HEADER, MAX_JSON_BODY_BYTES, WS_PATH};
use crate::core::ip_extractor::IpExtractionConfig;
use crate::core::server::BoardServer;
use crate::security::with_security_headers;
use filters::{admin_only, client_ip, rate_limited, with_board};

// Re-export the entry points used by the binary
pub use rejection::handle_rejection;
pub use websocket::handle_ws_client;

/// Every route the board serves, with CORS, error rendering and security
/// headers applied
pub fn routes(
    board: Arc<BoardServer>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let config = board.config().clone();
    let ip_config = IpExtractionConfig::from_server_config(&config);
    let admin_token: Arc<str> = Arc::from(config.admin_token.as_str());

    let list = warp::path!("api" / "posts")
        .and(warp::get())
        .and(with_board(board.clone()))
        .and_then(posts::list_posts);

    let trending = warp::path!("api" / "trending")
        .and(warp::get())
        .and(with_board(board.clone()))
        .and_then(posts::trending_posts);

    let create = warp::path!("api" / "posts")
        .and(warp::post())
        .and(rate_limited(board.post_limiter().clone(), ip_config.clone()))
        .and(json_body())
        .and(with_board(board.clone()))
        .and_then(posts::create_post);

    let vote = warp::path!("api" / "posts" / String / "vote")
        .and(warp::post())
        .and(rate_limited(board.vote_limiter().clone(), ip_config.clone()))
        .and(json_body())
        .and(with_board(board.clone()))
        .and_then(posts::vote);

    let delete = warp::path!("api" / "posts" / String)
        .and(warp::delete())
        .and(admin_only(admin_token))
        .and(with_board(board.clone()))
        .and_then(posts::delete_post);

    let hub = board.hub().clone();
    let ws = warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(client_ip(ip_config))
        .map(move |ws: warp::ws::Ws, ip: IpAddr| {
            info!("New websocket connection from {}", ip);
            let hub = hub.clone();
            ws.on_upgrade(move |socket| handle_ws_client(socket, hub, Some(ip)))
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_board(board))
        .and_then(posts::health);

    let index = warp::path::end()
        .and(warp::get())
        .and(warp::fs::file(config.public_dir.join("index.html")));

    let api = list.or(trending).or(create).or(vote).or(delete);

    api.or(ws)
        .or(health)
        .or(index)
        .with(cors(config.cors_origin.as_deref()))
        .recover(handle_rejection)
        .map(|reply| with_security_headers(reply))
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_JSON_BODY_BYTES).and(warp::body::json())
}

fn cors(origin: Option<&str>) -> warp::filters::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allow_headers(vec![
            "origin",
            "content-type",
            "accept",
            "authorization",
            ADMIN_TOKEN_HEADER,
        ])
        .expose_header("content-length");

    match origin {
        Some(origin) => builder.allow_origin(origin),
        None => builder.allow_any_origin(),
    }
}
