//! In-memory storage implementation for development and testing
//!
//! Tables live behind a single `RwLock` so a commit becomes visible to
//! readers all at once. Every post row also owns an async mutex which plays
//! the part of a `SELECT ... FOR UPDATE` row lock: a transaction holds it from
//! `lock_post` until commit or rollback.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::traits::*;
use crate::constants::DEFAULT_STORE_LOCK_TIMEOUT_SECS;
use crate::error::{MurmurError, Result};

#[derive(Default)]
struct Tables {
    posts: BTreeMap<PostId, Post>,
    votes: Vec<Vote>,
}

type RowLocks = Arc<RwLock<HashMap<PostId, Arc<Mutex<()>>>>>;

/// In-memory post storage with row-level locking transactions
pub struct MemoryPostStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: RowLocks,
    next_post_id: AtomicU64,
    next_vote_id: Arc<AtomicU64>,
    lock_timeout: Duration,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(DEFAULT_STORE_LOCK_TIMEOUT_SECS))
    }

    /// Create a store whose transactions give up waiting for a row lock
    /// after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            row_locks: Arc::new(RwLock::new(HashMap::new())),
            next_post_id: AtomicU64::new(1),
            next_vote_id: Arc::new(AtomicU64::new(1)),
            lock_timeout,
        }
    }
}

impl Default for MemoryPostStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn create_post(&self, content: String, initial_score: i64) -> Result<Post> {
        let id = self.next_post_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let post = Post {
            id,
            content,
            score: initial_score,
            hidden: false,
            created_at: now,
            updated_at: now,
        };

        // Row lock first so the post is lockable the moment it is readable
        self.row_locks
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(())));
        self.tables.write().await.posts.insert(id, post.clone());

        Ok(post)
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|post| !post.hidden)
            .cloned()
            .collect();

        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts)
    }

    async fn trending_posts(&self, limit: usize) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|post| !post.hidden)
            .cloned()
            .collect();

        posts.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        posts.truncate(limit);
        Ok(posts)
    }

    async fn get_post(&self, post_id: PostId) -> Result<Option<Post>> {
        let tables = self.tables.read().await;
        Ok(tables
            .posts
            .get(&post_id)
            .filter(|post| !post.hidden)
            .cloned())
    }

    async fn votes_for_post(&self, post_id: PostId) -> Result<Vec<Vote>> {
        let tables = self.tables.read().await;
        Ok(tables
            .votes
            .iter()
            .filter(|vote| vote.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            row_locks: self.row_locks.clone(),
            next_vote_id: self.next_vote_id.clone(),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            writes: Vec::new(),
        }))
    }
}

enum PendingWrite {
    InsertVote(Vote),
    SetScore(PostId, i64),
    SetHidden(PostId, bool),
}

/// Transaction over [`MemoryPostStore`]; buffers writes until commit
pub struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    row_locks: RowLocks,
    next_vote_id: Arc<AtomicU64>,
    lock_timeout: Duration,
    held: HashMap<PostId, OwnedMutexGuard<()>>,
    writes: Vec<PendingWrite>,
}

impl MemoryTransaction {
    fn require_lock(&self, post_id: PostId) -> Result<()> {
        if self.held.contains_key(&post_id) {
            Ok(())
        } else {
            Err(MurmurError::Conflict(format!(
                "post {} is not locked by this transaction",
                post_id
            )))
        }
    }

    // Our own uncommitted writes are visible inside the transaction
    fn overlay_pending(&self, post: &mut Post) {
        for write in &self.writes {
            match write {
                PendingWrite::SetScore(id, score) if *id == post.id => post.score = *score,
                PendingWrite::SetHidden(id, hidden) if *id == post.id => post.hidden = *hidden,
                _ => {}
            }
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_post(&mut self, post_id: PostId) -> Result<Option<Post>> {
        if !self.held.contains_key(&post_id) {
            let row_lock = self.row_locks.read().await.get(&post_id).cloned();
            let Some(row_lock) = row_lock else {
                return Ok(None);
            };

            let guard = tokio::time::timeout(self.lock_timeout, row_lock.lock_owned())
                .await
                .map_err(|_| {
                    MurmurError::Conflict(format!(
                        "timed out after {:?} waiting for lock on post {}",
                        self.lock_timeout, post_id
                    ))
                })?;
            self.held.insert(post_id, guard);
        }

        let post = self.tables.read().await.posts.get(&post_id).cloned();
        Ok(post.map(|mut post| {
            self.overlay_pending(&mut post);
            post
        }))
    }

    async fn insert_vote(&mut self, post_id: PostId, value: VoteValue) -> Result<Vote> {
        self.require_lock(post_id)?;

        // IDs behave like a sequence: a rolled back vote leaves a gap
        let vote = Vote {
            id: self.next_vote_id.fetch_add(1, Ordering::Relaxed),
            post_id,
            value,
            created_at: Utc::now(),
        };
        self.writes.push(PendingWrite::InsertVote(vote.clone()));
        Ok(vote)
    }

    async fn update_score(&mut self, post_id: PostId, score: i64) -> Result<()> {
        self.require_lock(post_id)?;
        self.writes.push(PendingWrite::SetScore(post_id, score));
        Ok(())
    }

    async fn set_hidden(&mut self, post_id: PostId, hidden: bool) -> Result<()> {
        self.require_lock(post_id)?;
        self.writes.push(PendingWrite::SetHidden(post_id, hidden));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            tables,
            held,
            writes,
            ..
        } = *self;

        if !writes.is_empty() {
            let mut tables = tables.write().await;
            let now = Utc::now();
            for write in writes {
                match write {
                    PendingWrite::InsertVote(vote) => tables.votes.push(vote),
                    PendingWrite::SetScore(id, score) => {
                        if let Some(post) = tables.posts.get_mut(&id) {
                            post.score = score;
                            post.updated_at = now;
                        }
                    }
                    PendingWrite::SetHidden(id, hidden) => {
                        if let Some(post) = tables.posts.get_mut(&id) {
                            post.hidden = hidden;
                            post.updated_at = now;
                        }
                    }
                }
            }
        }

        // Row locks are released only once the writes are visible
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}
