//! Storage mechanisms for posts and votes

pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryPostStore;
pub use sqlite::SqlitePostStore;
pub use traits::{Post, PostId, PostStore, StoreTransaction, Vote, VoteId, VoteValue};

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::{MurmurError, Result};

/// Where posts live, parsed from a `DATABASE_URL` style string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// `memory://`, lost on restart
    Memory,
    /// `sqlite://<path>`
    Sqlite(PathBuf),
}

impl StoreLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url == "memory://" {
            return Ok(StoreLocation::Memory);
        }
        match url.strip_prefix("sqlite://") {
            Some(path) if !path.is_empty() => Ok(StoreLocation::Sqlite(PathBuf::from(path))),
            _ => Err(MurmurError::ConfigError(format!(
                "database URL must be sqlite://<path> or memory://, got {:?}",
                url
            ))),
        }
    }
}

/// Open the store named by the configuration
pub fn open_store(config: &ServerConfig) -> Result<Arc<dyn PostStore>> {
    match StoreLocation::parse(&config.database_url)? {
        StoreLocation::Memory => {
            warn!("Using the in-memory store, posts are lost on restart");
            Ok(Arc::new(MemoryPostStore::with_lock_timeout(
                config.store_lock_timeout,
            )))
        }
        StoreLocation::Sqlite(path) => {
            info!("Opening SQLite store at {}", path.display());
            Ok(Arc::new(SqlitePostStore::open(
                path,
                config.store_lock_timeout,
            )?))
        }
    }
}
