// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const WS_PATH: &str = "ws";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

// Post constraints
pub const DEFAULT_MAX_POST_LENGTH: usize = 1000;
pub const DEFAULT_INITIAL_SCORE: i64 = 1;
pub const DEFAULT_TRENDING_LIMIT: usize = 20;
pub const MAX_JSON_BODY_BYTES: u64 = 16 * 1024;

// Rate limiting: one post every three seconds, votes are cheaper
pub const DEFAULT_POST_RATE_PER_SEC: f64 = 1.0 / 3.0;
pub const DEFAULT_POST_RATE_BURST: u32 = 1;
pub const DEFAULT_VOTE_RATE_PER_SEC: f64 = 2.0;
pub const DEFAULT_VOTE_RATE_BURST: u32 = 5;
pub const DEFAULT_RATE_SWEEP_SECS: u64 = 600;

// Broadcast hub
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_SHUTDOWN_DRAIN_SECS: u64 = 5;

// Store
pub const DEFAULT_DATABASE_URL: &str = "sqlite://murmur.db";
pub const DEFAULT_STORE_LOCK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PUBLIC_DIR: &str = "./public";
