use std::error::Error;
use std::fmt;

use warp::http::StatusCode;

use crate::storage::PostId;

#[derive(Debug)]
pub enum MurmurError {
    // Request errors
    InvalidInput(String),
    InvalidVoteValue(i64),

    // Lookup errors
    PostNotFound(PostId),

    // Admission errors
    RateLimited,

    // Store errors
    Conflict(String),
    StoreUnavailable(String),

    // Connection errors
    SlowConsumer(String),
    ConnectionError(String),
    HubClosed,

    // Messages errors
    MessageParseError(String),

    // Auth errors
    Unauthorized,
    Forbidden,

    // Configuration errors
    ConfigError(String),
}

impl MurmurError {
    /// HTTP status a client sees for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::InvalidVoteValue(_) | Self::MessageParseError(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PostNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::StoreUnavailable(_) | Self::HubClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::SlowConsumer(_) | Self::ConnectionError(_) | Self::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the same request may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Conflict(_) | Self::StoreUnavailable(_)
        )
    }

    /// Message safe to show to clients. Store internals stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Conflict(_) | Self::StoreUnavailable(_) => {
                "Temporarily unable to process request, please retry".to_string()
            }
            Self::RateLimited => "Too many requests. Please wait.".to_string(),
            Self::SlowConsumer(_) | Self::ConnectionError(_) | Self::ConfigError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for MurmurError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::InvalidVoteValue(value) => {
                write!(f, "Invalid vote value {}: must be 1 or -1", value)
            }
            Self::PostNotFound(id) => write!(f, "Post not found: {}", id),
            Self::RateLimited => write!(f, "Rate limit exceeded"),
            Self::Conflict(msg) => write!(f, "Transaction conflict: {}", msg),
            Self::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Self::SlowConsumer(id) => write!(f, "Slow consumer evicted: {}", id),
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::HubClosed => write!(f, "Broadcast hub is shut down"),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::Unauthorized => write!(f, "Unauthorized: Admin token required"),
            Self::Forbidden => write!(f, "Forbidden: Invalid admin token"),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for MurmurError {}

impl warp::reject::Reject for MurmurError {}

impl From<serde_json::Error> for MurmurError {
    fn from(err: serde_json::Error) -> Self {
        MurmurError::MessageParseError(err.to_string())
    }
}

impl From<rusqlite::Error> for MurmurError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            // Another writer held the database past the busy timeout
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                MurmurError::Conflict(err.to_string())
            }
            _ => MurmurError::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for MurmurError {
    fn from(err: r2d2::Error) -> Self {
        MurmurError::StoreUnavailable(format!("connection pool: {}", err))
    }
}

// Generic result type for Murmur
pub type Result<T> = std::result::Result<T, MurmurError>;
