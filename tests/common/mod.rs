// Shared helpers: an in-process board server on an ephemeral port

#![allow(dead_code)]

use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use murmur::config::{RateLimitConfig, ServerConfig};
use murmur::core::{BoardServer, Hub};
use murmur::handlers::routes;
use murmur::storage::{MemoryPostStore, PostStore};

pub const ADMIN_TOKEN: &str = "integration-admin-token";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub board: Arc<BoardServer>,
    pub http: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Open a WebSocket client and wait until the hub has registered it
    pub async fn connect_ws(&self) -> WsClient {
        let before = self.board.hub().connection_count().await.unwrap();
        let url = format!("ws://{}/ws", self.addr);
        let (ws_stream, _) = tokio::time::timeout(Duration::from_secs(5), connect_async(url))
            .await
            .expect("WebSocket connection timeout after 5 seconds")
            .expect("Failed to establish WebSocket connection");
        self.wait_for_connections(before + 1).await;
        ws_stream
    }

    pub async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..200 {
            if self.board.hub().connection_count().await.unwrap_or(0) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub never reached {} connections", expected);
    }

    pub async fn create_post(&self, content: &str) -> Value {
        let response = self
            .http
            .post(self.url("/api/posts"))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }
}

/// Config with generous write limits so tests can post freely
pub fn relaxed_config() -> ServerConfig {
    let mut config = ServerConfig::with_admin_token(ADMIN_TOKEN);
    config.post_rate = RateLimitConfig::new(1000.0, 1000);
    config.vote_rate = RateLimitConfig::new(1000.0, 1000);
    config.public_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("public");
    config
}

pub async fn start_server(config: ServerConfig) -> TestServer {
    let store = Arc::new(MemoryPostStore::with_lock_timeout(config.store_lock_timeout));
    start_server_with_store(config, store).await
}

pub async fn start_server_with_store(config: ServerConfig, store: Arc<dyn PostStore>) -> TestServer {
    let hub = Hub::spawn(config.outbound_queue_capacity);
    let board = Arc::new(BoardServer::new(store, hub, config));

    let (addr, server) = warp::serve(routes(board.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    TestServer {
        addr,
        board,
        http: reqwest::Client::new(),
    }
}

/// Next text frame as JSON, failing after two seconds
pub async fn next_event(ws: &mut WsClient) -> Value {
    match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).unwrap(),
        Ok(other) => panic!("Expected a text frame, got {:?}", other),
        Err(_) => panic!("Timeout waiting for server event"),
    }
}

/// Assert nothing arrives for a short while
pub async fn assert_silent(ws: &mut WsClient) {
    if let Ok(frame) = tokio::time::timeout(Duration::from_millis(150), ws.next()).await {
        panic!("Expected no event, got {:?}", frame);
    }
}
