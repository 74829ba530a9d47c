//! Abstract storage interfaces for pluggable backends
//!
//! The board treats its store as an opaque transactional engine: plain reads
//! and inserts go through [`PostStore`], anything that must see a consistent
//! row while changing it goes through a [`StoreTransaction`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MurmurError, Result};

pub type PostId = u64;
pub type VoteId = u64;

/// A single anonymous post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub content: String,
    pub score: i64,
    /// Soft-delete marker, never sent to clients
    #[serde(skip)]
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn delta(self) -> i64 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = MurmurError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(MurmurError::InvalidVoteValue(other)),
        }
    }
}

impl From<VoteValue> for i64 {
    fn from(value: VoteValue) -> Self {
        value.delta()
    }
}

/// An immutable vote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub post_id: PostId,
    pub value: VoteValue,
    pub created_at: DateTime<Utc>,
}

/// Post storage interface
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a new visible post with the given starting score
    async fn create_post(&self, content: String, initial_score: i64) -> Result<Post>;

    /// Visible posts, newest first
    async fn list_posts(&self) -> Result<Vec<Post>>;

    /// Visible posts by score, ties broken newest first
    async fn trending_posts(&self, limit: usize) -> Result<Vec<Post>>;

    /// Get a visible post by ID
    async fn get_post(&self, post_id: PostId) -> Result<Option<Post>>;

    /// All committed votes for a post, oldest first
    async fn votes_for_post(&self, post_id: PostId) -> Result<Vec<Vote>>;

    /// Health check for the storage backend
    async fn health_check(&self) -> Result<()>;

    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A unit of work over locked post rows.
///
/// Writes to a row are only accepted once that row has been locked with
/// [`StoreTransaction::lock_post`]. Nothing is visible to other readers until
/// [`StoreTransaction::commit`]; dropping the transaction discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read a post row and hold its lock until commit or rollback.
    /// Hidden rows are returned too, callers decide what hidden means.
    async fn lock_post(&mut self, post_id: PostId) -> Result<Option<Post>>;

    /// Append a vote record for a locked post
    async fn insert_vote(&mut self, post_id: PostId, value: VoteValue) -> Result<Vote>;

    /// Overwrite the score of a locked post
    async fn update_score(&mut self, post_id: PostId, score: i64) -> Result<()>;

    /// Set the soft-delete marker of a locked post
    async fn set_hidden(&mut self, post_id: PostId, hidden: bool) -> Result<()>;

    /// Make every write visible atomically and release the row locks
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write and release the row locks
    async fn rollback(self: Box<Self>) -> Result<()>;
}
